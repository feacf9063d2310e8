use tracing::warn;

use crate::entities::order::OrderStatus;

/// Payment status vocabulary reported by the gateway, both in webhooks and in
/// `GetState` responses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayPaymentStatus {
    New,
    FormShowed,
    Authorized,
    Confirmed,
    Canceled,
    DeadlineExpired,
    Rejected,
    /// Statuses this subsystem does not act on are preserved for logging.
    Other(String),
}

impl GatewayPaymentStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "NEW" => Self::New,
            "FORM_SHOWED" => Self::FormShowed,
            "AUTHORIZED" => Self::Authorized,
            "CONFIRMED" => Self::Confirmed,
            "CANCELED" => Self::Canceled,
            "DEADLINE_EXPIRED" => Self::DeadlineExpired,
            "REJECTED" => Self::Rejected,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::New => "NEW",
            Self::FormShowed => "FORM_SHOWED",
            Self::Authorized => "AUTHORIZED",
            Self::Confirmed => "CONFIRMED",
            Self::Canceled => "CANCELED",
            Self::DeadlineExpired => "DEADLINE_EXPIRED",
            Self::Rejected => "REJECTED",
            Self::Other(raw) => raw,
        }
    }
}

/// What a gateway event means for the order, independent of prior state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentOutcome {
    Paid,
    NotPaid,
}

/// Maps a gateway status + success flag to a payment outcome.
/// Intermediate statuses (NEW, FORM_SHOWED, ...) with the success flag still
/// set produce no outcome: the payment is simply not settled yet.
pub fn outcome_for(status: &GatewayPaymentStatus, success: bool) -> Option<PaymentOutcome> {
    match status {
        GatewayPaymentStatus::Confirmed => Some(PaymentOutcome::Paid),
        GatewayPaymentStatus::Authorized if success => Some(PaymentOutcome::Paid),
        GatewayPaymentStatus::Canceled
        | GatewayPaymentStatus::DeadlineExpired
        | GatewayPaymentStatus::Rejected => Some(PaymentOutcome::NotPaid),
        _ if !success => Some(PaymentOutcome::NotPaid),
        _ => None,
    }
}

/// Target order status for an outcome given the previous status.
///
/// A non-success outcome maps to `failed` only when the order had already
/// entered `payment_pending`; otherwise it maps to `canceled`. The
/// distinction is a preserved business rule, not an implementation accident.
pub fn target_for_outcome(outcome: PaymentOutcome, previous: OrderStatus) -> OrderStatus {
    match outcome {
        PaymentOutcome::Paid => OrderStatus::Paid,
        PaymentOutcome::NotPaid => {
            if previous == OrderStatus::PaymentPending {
                OrderStatus::Failed
            } else {
                OrderStatus::Canceled
            }
        }
    }
}

/// Full translation step used by the webhook handler: previous status plus a
/// gateway event, to the next order status if a transition applies.
///
/// Terminal states never regress: a late or out-of-order event against a
/// settled order is logged and ignored.
pub fn next_status(
    previous: OrderStatus,
    status: &GatewayPaymentStatus,
    success: bool,
) -> Option<OrderStatus> {
    if previous.is_terminal() {
        if outcome_for(status, success).is_some() {
            warn!(
                previous = %previous,
                gateway_status = status.as_str(),
                "ignoring gateway event against a terminal order status"
            );
        }
        return None;
    }

    let outcome = outcome_for(status, success)?;
    Some(target_for_outcome(outcome, previous))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmed_means_paid() {
        assert_eq!(
            next_status(
                OrderStatus::PaymentPending,
                &GatewayPaymentStatus::Confirmed,
                true
            ),
            Some(OrderStatus::Paid)
        );
        // CONFIRMED wins even with a stale success flag
        assert_eq!(
            outcome_for(&GatewayPaymentStatus::Confirmed, false),
            Some(PaymentOutcome::Paid)
        );
    }

    #[test]
    fn authorized_requires_success_flag() {
        assert_eq!(
            outcome_for(&GatewayPaymentStatus::Authorized, true),
            Some(PaymentOutcome::Paid)
        );
        assert_eq!(
            outcome_for(&GatewayPaymentStatus::Authorized, false),
            Some(PaymentOutcome::NotPaid)
        );
    }

    #[test]
    fn failure_maps_to_failed_only_from_payment_pending() {
        assert_eq!(
            next_status(
                OrderStatus::PaymentPending,
                &GatewayPaymentStatus::Rejected,
                false
            ),
            Some(OrderStatus::Failed)
        );
        assert_eq!(
            next_status(OrderStatus::Pending, &GatewayPaymentStatus::Rejected, false),
            Some(OrderStatus::Canceled)
        );
        assert_eq!(
            next_status(
                OrderStatus::Pending,
                &GatewayPaymentStatus::DeadlineExpired,
                false
            ),
            Some(OrderStatus::Canceled)
        );
    }

    #[test]
    fn intermediate_statuses_with_success_are_ignored() {
        assert_eq!(outcome_for(&GatewayPaymentStatus::New, true), None);
        assert_eq!(outcome_for(&GatewayPaymentStatus::FormShowed, true), None);
        assert_eq!(
            outcome_for(&GatewayPaymentStatus::Other("3DS_CHECKING".into()), true),
            None
        );
    }

    #[test]
    fn terminal_states_never_regress() {
        assert_eq!(
            next_status(OrderStatus::Paid, &GatewayPaymentStatus::Rejected, false),
            None
        );
        assert_eq!(
            next_status(OrderStatus::Failed, &GatewayPaymentStatus::Confirmed, true),
            None
        );
        assert_eq!(
            next_status(OrderStatus::Canceled, &GatewayPaymentStatus::Confirmed, true),
            None
        );
        // Re-applying paid to an already-paid order is also a no-op
        assert_eq!(
            next_status(OrderStatus::Paid, &GatewayPaymentStatus::Confirmed, true),
            None
        );
    }

    #[test]
    fn gateway_status_round_trips() {
        for raw in [
            "NEW",
            "FORM_SHOWED",
            "AUTHORIZED",
            "CONFIRMED",
            "CANCELED",
            "DEADLINE_EXPIRED",
            "REJECTED",
        ] {
            assert_eq!(GatewayPaymentStatus::parse(raw).as_str(), raw);
        }
        assert_eq!(
            GatewayPaymentStatus::parse("REFUNDED"),
            GatewayPaymentStatus::Other("REFUNDED".into())
        );
    }
}
