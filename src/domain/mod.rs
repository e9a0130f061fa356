pub mod csv_export;
pub mod lead;
pub mod search;
