use energy_domain::domain::{
    BillingWindow, ConsumptionSummary, MeterDataSeries, PeriodConsumption, TimeOfUsePeriod, UNCATEGORIZED,
};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregateError {
    #[error("no series to aggregate")]
    NoSeries,
    #[error("series belong to different connections: {0} and {1}")]
    MixedConnections(String, String),
}

/// Multiplier converting an energy unit to kWh; `None` for non-energy units.
fn kwh_factor(unit_of_measure: &str) -> Option<f64> {
    match unit_of_measure.trim().to_ascii_lowercase().as_str() {
        "wh" => Some(0.001),
        "kwh" => Some(1.0),
        "mwh" => Some(1000.0),
        _ => None,
    }
}

/// Bucket one connection's interval energy into time-of-use periods over a
/// billing window.
///
/// Each interval starts `index * interval_length` minutes after midnight and
/// goes to the first period containing that start; intervals matching no
/// period land in the uncategorized bucket. Periods sharing a name share a
/// bucket. Unknown readings are counted but add no energy. Series in units
/// other than Wh/kWh/MWh are skipped.
pub fn aggregate(
    series: &[MeterDataSeries],
    periods: &[TimeOfUsePeriod],
    window: BillingWindow,
) -> Result<ConsumptionSummary, AggregateError> {
    let first = series.first().ok_or(AggregateError::NoSeries)?;
    if let Some(other) = series.iter().find(|s| s.connection_id != first.connection_id) {
        return Err(AggregateError::MixedConnections(
            first.connection_id.clone(),
            other.connection_id.clone(),
        ));
    }

    let mut buckets: Vec<PeriodConsumption> = Vec::new();
    let bucket_of: Vec<usize> = periods
        .iter()
        .map(|p| bucket_index(&mut buckets, &p.name))
        .collect();
    let uncategorized = bucket_index(&mut buckets, UNCATEGORIZED);

    let mut total_kwh = 0.0;
    let mut peak_demand_kw: Option<f64> = None;
    let mut known_intervals = 0;
    let mut unknown_intervals = 0;

    for s in series {
        let Some(factor) = kwh_factor(&s.unit_of_measure) else {
            tracing::debug!(
                register_id = %s.register_id,
                unit = %s.unit_of_measure,
                "skipping non-energy series"
            );
            continue;
        };
        let length = s.interval_length_minutes;

        for day in s.days.iter().filter(|d| window.contains(d.date)) {
            let weekday = day.date.weekday();
            for (idx, value) in day.values.iter().enumerate() {
                let Some(raw) = value else {
                    unknown_intervals += 1;
                    continue;
                };
                let kwh = raw * factor;
                let minute = idx as u32 * length;
                let bucket = periods
                    .iter()
                    .position(|p| p.contains(weekday, minute))
                    .map(|i| bucket_of[i])
                    .unwrap_or(uncategorized);

                buckets[bucket].kwh += kwh;
                buckets[bucket].interval_count += 1;
                total_kwh += kwh;
                known_intervals += 1;

                let demand = kwh * 60.0 / length as f64;
                peak_demand_kw = Some(peak_demand_kw.map_or(demand, |p: f64| p.max(demand)));
            }
        }
    }

    // Keep the uncategorized bucket last even if a period shares its name.
    if uncategorized + 1 != buckets.len() {
        let b = buckets.remove(uncategorized);
        buckets.push(b);
    }

    Ok(ConsumptionSummary {
        connection_id: first.connection_id.clone(),
        period_start: window.start(),
        period_end: window.end(),
        periods: buckets,
        total_kwh,
        peak_demand_kw,
        known_intervals,
        unknown_intervals,
    })
}

fn bucket_index(buckets: &mut Vec<PeriodConsumption>, name: &str) -> usize {
    if let Some(i) = buckets.iter().position(|b| b.name == name) {
        return i;
    }
    buckets.push(PeriodConsumption {
        name: name.to_string(),
        kwh: 0.0,
        interval_count: 0,
    });
    buckets.len() - 1
}
