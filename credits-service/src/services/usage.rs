//! Usage calculator: audio duration to credit cost.

use crate::services::CreditError;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// 1.3 credits per minute of audio.
pub const CREDITS_PER_MINUTE: Decimal = Decimal::from_parts(13, 0, 0, false, 1);

/// Credits charged for `duration_minutes` of audio.
///
/// Rounds half up to whole credits; any positive duration costs at least one
/// credit. Deterministic and free of I/O, so a quoted cost always equals the
/// charged cost.
pub fn credits_for_minutes(duration_minutes: f64) -> Result<i64, CreditError> {
    if !duration_minutes.is_finite() || duration_minutes <= 0.0 {
        return Err(CreditError::InvalidInput(format!(
            "Audio duration must be a positive number of minutes, got {}",
            duration_minutes
        )));
    }

    let minutes = Decimal::from_f64(duration_minutes)
        .ok_or_else(|| CreditError::InvalidInput("Audio duration is out of range".to_string()))?;

    let cost = minutes
        .checked_mul(CREDITS_PER_MINUTE)
        .map(|c| c.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|c| c.to_i64())
        .ok_or_else(|| CreditError::InvalidInput("Audio duration is out of range".to_string()))?;

    Ok(cost.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_minutes_costs_thirteen() {
        assert_eq!(credits_for_minutes(10.0).unwrap(), 13);
    }

    #[test]
    fn rounds_half_up() {
        // 5 * 1.3 = 6.5
        assert_eq!(credits_for_minutes(5.0).unwrap(), 7);
        // 15 * 1.3 = 19.5
        assert_eq!(credits_for_minutes(15.0).unwrap(), 20);
        // 1 * 1.3 = 1.3
        assert_eq!(credits_for_minutes(1.0).unwrap(), 1);
        // 50 * 1.3 = 65
        assert_eq!(credits_for_minutes(50.0).unwrap(), 65);
    }

    #[test]
    fn short_audio_costs_one_credit() {
        assert_eq!(credits_for_minutes(0.1).unwrap(), 1);
    }

    #[test]
    fn same_duration_same_cost() {
        let first = credits_for_minutes(42.7).unwrap();
        for _ in 0..10 {
            assert_eq!(credits_for_minutes(42.7).unwrap(), first);
        }
    }

    #[test]
    fn rejects_non_positive_and_non_finite() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                credits_for_minutes(bad),
                Err(CreditError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn rejects_absurd_durations() {
        assert!(matches!(
            credits_for_minutes(1e30),
            Err(CreditError::InvalidInput(_))
        ));
    }
}
