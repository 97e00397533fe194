pub mod invoice_csv_file;
pub mod nem12_file;

pub use invoice_csv_file::read_invoice_items;
pub use nem12_file::Nem12FileSource;
