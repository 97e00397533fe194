use energy_domain::domain::IntervalReading;
use time::{macros::date, Date};

use crate::pipeline::{Envelope, PipelineError, Transform};

const EARLIEST_DATE: Date = date!(2000-01-01);
const LATEST_DATE: Date = date!(2100-01-01);

/// Sanity checks on a reading before it is stored.
///
/// Rules:
/// - known energy must be finite and non-negative; unknown readings pass.
/// - the interval date must fall in [2000-01-01, 2100-01-01).
pub fn validate_interval_reading(env: Envelope<IntervalReading>) -> Result<Envelope<IntervalReading>, PipelineError> {
    let r = &env.payload;

    if let Some(energy) = r.energy {
        if !energy.is_finite() || energy < 0.0 {
            return Err(PipelineError::Transform(format!(
                "{}/{} interval {} on {}: energy must be non-negative, got {energy}",
                r.connection_id, r.register_id, r.interval_index, r.date
            )));
        }
    }

    if r.date < EARLIEST_DATE || r.date >= LATEST_DATE {
        return Err(PipelineError::Transform(format!(
            "{}/{}: interval date {} out of allowed range",
            r.connection_id, r.register_id, r.date
        )));
    }

    Ok(env)
}

#[derive(Clone, Default)]
pub struct IntervalReadingValidation;

#[async_trait::async_trait]
impl Transform<IntervalReading, IntervalReading> for IntervalReadingValidation {
    async fn apply(&self, input: Envelope<IntervalReading>) -> Result<Envelope<IntervalReading>, PipelineError> {
        validate_interval_reading(input).inspect_err(|_| {
            metrics::counter!("validation_interval_reading_rejected_total").increment(1);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use energy_domain::domain::{QualityFlag, QualityMethod};
    use time::macros::datetime;

    fn reading(date: Date, energy: Option<f64>) -> Envelope<IntervalReading> {
        Envelope::new(IntervalReading {
            connection_id: "NMI1".to_string(),
            register_id: "E1".to_string(),
            suffix: "E1".to_string(),
            date,
            interval_index: 0,
            interval_length_minutes: 30,
            start: datetime!(2024-01-01 00:00:00 +10),
            energy,
            unit_of_measure: "kWh".to_string(),
            quality: QualityMethod::new(QualityFlag::Actual),
        })
    }

    #[test]
    fn accepts_valid_and_unknown_readings() {
        assert!(validate_interval_reading(reading(date!(2024-01-01), Some(1.0))).is_ok());
        assert!(validate_interval_reading(reading(date!(2024-01-01), None)).is_ok());
        assert!(validate_interval_reading(reading(date!(2000-01-01), Some(0.0))).is_ok());
    }

    #[test]
    fn rejects_negative_energy() {
        let res = validate_interval_reading(reading(date!(2024-01-01), Some(-0.1)));
        assert!(matches!(res, Err(PipelineError::Transform(_))));
    }

    #[test]
    fn rejects_out_of_range_dates() {
        for date in [date!(1999-12-31), date!(2100-01-01)] {
            let res = validate_interval_reading(reading(date, Some(1.0)));
            assert!(matches!(res, Err(PipelineError::Transform(_))), "{date}");
        }
    }
}
