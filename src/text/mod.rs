//! Line-oriented text input and output

pub mod aggbag_build;
pub mod bad_lines;
pub mod cat;
pub mod ipset_build;
pub mod netstruct;
pub mod reader;

pub use aggbag_build::{parse_columns, AggBagBuilder};
pub use bad_lines::BadLines;
pub use cat::{
    write_aggbag, write_bag, write_ipset, write_ipset_ranges, write_ipset_statistics,
    write_network_structure, TextLayout,
};
pub use ipset_build::{read_ipset_lines, SetEntry};
pub use netstruct::NetStructure;
pub use reader::{Line, LineReader};
