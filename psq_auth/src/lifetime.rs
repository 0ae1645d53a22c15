//! Expiry math and time-to-live policy for persisted credentials

use psq_clock::{Clock, DurationSecs, UnixTime};

/// Computes how long a credential may be relied upon, given its
/// service-reported validity and a safety margin
///
/// Saturates at zero: a margin exceeding the reported validity yields a
/// credential that is already due for renewal, never a negative window.
#[inline]
pub fn margined_validity(valid_for: DurationSecs, margin: DurationSecs) -> DurationSecs {
    valid_for.saturating_sub(margin)
}

/// Computes the instant at which a credential lapses, `margin` seconds
/// ahead of its service-reported expiry
///
/// Never yields an instant earlier than the clock's current time.
#[inline]
pub fn expiry_instant<C: Clock>(
    clock: &C,
    valid_for: DurationSecs,
    margin: DurationSecs,
) -> UnixTime {
    clock.now() + margined_validity(valid_for, margin)
}

/// Whether the given instant has been reached
///
/// Expiry is strict: a credential lapses at the instant itself, not after.
#[inline]
pub fn is_expired<C: Clock>(clock: &C, expiry: UnixTime) -> bool {
    clock.now() >= expiry
}

/// Time-to-live policy applied when persisting tokens
///
/// Access tokens lapse ahead of their service-reported expiry; the margin
/// is wider for the initial code exchange than for refreshes, which occur
/// more frequently against a warmer path. The refresh credential and the
/// session token are app-level artifacts with long fixed windows
/// independent of anything the service reports.
#[derive(Clone, Debug)]
pub struct TokenLifetimeConfig {
    exchange_margin: DurationSecs,
    refresh_margin: DurationSecs,
    session_validity: DurationSecs,
    state_validity: DurationSecs,
}

impl Default for TokenLifetimeConfig {
    /// Default lifetime configuration
    ///
    /// Uses a 240 second margin on the initial exchange, a 120 second
    /// margin on refresh, 365 day session and refresh-credential windows,
    /// and a 5 minute window for the anti-CSRF state.
    fn default() -> Self {
        Self {
            exchange_margin: DurationSecs(240),
            refresh_margin: DurationSecs(120),
            session_validity: DurationSecs::days(365),
            state_validity: DurationSecs::minutes(5),
        }
    }
}

impl TokenLifetimeConfig {
    /// Constructs a lifetime configuration with custom safety margins
    ///
    /// The session and state windows keep their default values.
    pub fn new(exchange_margin: DurationSecs, refresh_margin: DurationSecs) -> Self {
        Self {
            exchange_margin,
            refresh_margin,
            ..Self::default()
        }
    }

    /// Time to live for an access token obtained from a code exchange
    #[inline]
    pub fn exchanged_access_ttl(&self, expires_in: DurationSecs) -> DurationSecs {
        margined_validity(expires_in, self.exchange_margin)
    }

    /// Time to live for an access token obtained from a refresh
    #[inline]
    pub fn refreshed_access_ttl(&self, expires_in: DurationSecs) -> DurationSecs {
        margined_validity(expires_in, self.refresh_margin)
    }

    /// Fixed validity window for the refresh credential and session token
    #[inline]
    pub fn session_validity(&self) -> DurationSecs {
        self.session_validity
    }

    /// Validity window for the anti-CSRF state
    #[inline]
    pub fn state_validity(&self) -> DurationSecs {
        self.state_validity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psq_clock::TestClock;

    #[test]
    fn expiry_instant_is_never_in_the_past() {
        let clock = TestClock::new(UnixTime(1_000));

        assert_eq!(
            expiry_instant(&clock, DurationSecs(3600), DurationSecs(240)),
            UnixTime(4_360)
        );
        assert_eq!(
            expiry_instant(&clock, DurationSecs(100), DurationSecs(240)),
            UnixTime(1_000)
        );
        assert_eq!(
            expiry_instant(&clock, DurationSecs(240), DurationSecs(240)),
            UnixTime(1_000)
        );
    }

    #[test]
    fn expiry_is_strict() {
        let clock = TestClock::new(UnixTime(999));
        assert!(!is_expired(&clock, UnixTime(1_000)));
        clock.inc(1);
        assert!(is_expired(&clock, UnixTime(1_000)));
    }

    #[test]
    fn default_margins_are_asymmetric() {
        let lifetime = TokenLifetimeConfig::default();
        assert_eq!(
            lifetime.exchanged_access_ttl(DurationSecs(3600)),
            DurationSecs(3360)
        );
        assert_eq!(
            lifetime.refreshed_access_ttl(DurationSecs(3600)),
            DurationSecs(3480)
        );
    }

    #[test]
    fn margin_wider_than_validity_clamps_to_zero() {
        let lifetime = TokenLifetimeConfig::default();
        assert_eq!(
            lifetime.exchanged_access_ttl(DurationSecs(60)),
            DurationSecs::ZERO
        );
    }

    #[test]
    fn fixed_windows() {
        let lifetime = TokenLifetimeConfig::default();
        assert_eq!(lifetime.session_validity(), DurationSecs::days(365));
        assert_eq!(lifetime.state_validity(), DurationSecs::minutes(5));
    }
}
