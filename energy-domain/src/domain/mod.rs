pub mod consumption;
pub mod interval;
pub mod invoice;
pub mod reconciliation;
pub mod tariff;

pub use consumption::{BillingWindow, ConsumptionSummary, InvalidWindow, PeriodConsumption, UNCATEGORIZED};
pub use interval::{
    intervals_per_day, interval_start, DayColumn, DayRow, DayTable, FileHeader, IntervalReading,
    InvalidQualityMethod, MeterDataSeries, QualityFlag, QualityMethod, MINUTES_PER_DAY,
};
pub use invoice::{CalculatedLineItem, ChargeType, InvoiceLineItem, LineItem};
pub use reconciliation::{DiscrepancyStatus, LineItemReconciliation, ReconciliationSummary, Thresholds};
pub use tariff::{all_weekdays, parse_clock, PeriodRate, Tariff, TimeOfUsePeriod, UsageRates};
