//! Domain types shared by the NEM12 ingestion and invoice reconciliation
//! service: interval data, time-of-use consumption, tariffs, invoice line
//! items and reconciliation results.

pub mod domain;
