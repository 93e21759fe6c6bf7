mod cycling_table;

pub use cycling_table::CyclingTableState;
