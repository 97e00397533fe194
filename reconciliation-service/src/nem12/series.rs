use energy_domain::domain::{DayRow, DayTable, MeterDataSeries};

/// Regroup finalized day tables into one series per (connection, register).
///
/// Series appear in order of first occurrence and their days are sorted by
/// date. A register whose interval length changes part-way through a file
/// starts a separate series for the new length, so every row of a series has
/// the series' interval count.
pub fn group_series(tables: &[DayTable]) -> Vec<MeterDataSeries> {
    let mut series: Vec<MeterDataSeries> = Vec::new();

    for table in tables {
        for col in &table.columns {
            let row = DayRow {
                date: table.date,
                values: col.values.clone(),
                quality: col.quality.clone(),
            };

            let existing = series.iter_mut().find(|s| {
                s.connection_id == table.connection_id
                    && s.register_id == col.register_id
                    && s.interval_length_minutes == table.interval_length_minutes
            });

            match existing {
                Some(s) => {
                    s.start_date = s.start_date.min(table.date);
                    s.end_date = s.end_date.max(table.date);
                    s.days.push(row);
                }
                None => series.push(MeterDataSeries {
                    connection_id: table.connection_id.clone(),
                    register_id: col.register_id.clone(),
                    suffix: col.suffix.clone(),
                    interval_length_minutes: table.interval_length_minutes,
                    unit_of_measure: col.unit_of_measure.clone(),
                    start_date: table.date,
                    end_date: table.date,
                    days: vec![row],
                }),
            }
        }
    }

    for s in &mut series {
        s.days.sort_by_key(|d| d.date);
    }
    series
}
