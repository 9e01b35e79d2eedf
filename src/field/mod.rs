pub mod names;
pub mod registry;
pub mod value;

pub use names::{NoSiteNames, SiteNames, SiteTable};
pub use registry::{
    iterate, lookup, lookup_in, max_for_width, width_of, Domain, FieldInfo, FieldType, Role,
    Semantic,
};
pub use value::{format_value, parse_value, Value, UNKNOWN_COUNTRY};
