//! Expiry decisions for GC registrations. Both deadlines are measured from
//! the registration's creation timestamp: the `ReutilizeTimeout` deadline is
//! the sum of both grace periods, not a fresh window.

use chrono::Duration;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use telepresence_types::GCRegistrationType;

/// What to do with an expired registration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ExpiryAction {
    /// Delete the pod and the registration.
    Reclaim,

    /// Keep the pod warm: flip the registration to `ReutilizeTimeout`.
    Demote,
}

/// Decides what an expired registration requires, or `None` while it is
/// still inside its grace period.
pub fn expiry_action(
    registration_type: GCRegistrationType,
    created: &Time,
    now: &Time,
    timeout_seconds: i64,
    reutilize_timeout_seconds: i64,
) -> Option<ExpiryAction> {
    match registration_type {
        GCRegistrationType::Timeout => {
            let deadline = created.0 + Duration::seconds(timeout_seconds);
            if now.0 < deadline {
                return None;
            }
            if reutilize_timeout_seconds == 0 {
                Some(ExpiryAction::Reclaim)
            } else {
                Some(ExpiryAction::Demote)
            }
        }
        GCRegistrationType::ReutilizeTimeout => {
            let deadline =
                created.0 + Duration::seconds(timeout_seconds + reutilize_timeout_seconds);
            if now.0 < deadline {
                return None;
            }
            Some(ExpiryAction::Reclaim)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(seconds: i64) -> Time {
        Time(Utc.timestamp_opt(seconds, 0).unwrap())
    }

    #[test]
    fn timeout_holds_until_the_deadline() {
        assert_eq!(
            expiry_action(GCRegistrationType::Timeout, &at(100), &at(129), 30, 60),
            None
        );
        assert_eq!(
            expiry_action(GCRegistrationType::Timeout, &at(100), &at(130), 30, 60),
            Some(ExpiryAction::Demote)
        );
    }

    #[test]
    fn zero_reutilize_timeout_skips_the_warm_state() {
        assert_eq!(
            expiry_action(GCRegistrationType::Timeout, &at(100), &at(130), 30, 0),
            Some(ExpiryAction::Reclaim)
        );
    }

    #[test]
    fn reutilize_deadline_is_the_sum_of_both_grace_periods() {
        assert_eq!(
            expiry_action(
                GCRegistrationType::ReutilizeTimeout,
                &at(100),
                &at(189),
                30,
                60
            ),
            None
        );
        assert_eq!(
            expiry_action(
                GCRegistrationType::ReutilizeTimeout,
                &at(100),
                &at(190),
                30,
                60
            ),
            Some(ExpiryAction::Reclaim)
        );
    }
}
