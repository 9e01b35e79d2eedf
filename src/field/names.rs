use std::collections::HashMap;

/// Name resolution for site-specific identifiers. The registry consults
/// this when parsing or formatting sensor, class and flowtype values.
pub trait SiteNames {
    fn sensor_id(&self, name: &str) -> Option<u16>;
    fn sensor_name(&self, id: u16) -> Option<String>;
    fn class_id(&self, name: &str) -> Option<u8>;
    fn class_name(&self, id: u8) -> Option<String>;
    fn flowtype_id(&self, name: &str) -> Option<u8>;
    fn flowtype_name(&self, id: u8) -> Option<String>;
}

/// Resolver that knows no names; values are read and written as numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSiteNames;

impl SiteNames for NoSiteNames {
    fn sensor_id(&self, _name: &str) -> Option<u16> {
        None
    }

    fn sensor_name(&self, _id: u16) -> Option<String> {
        None
    }

    fn class_id(&self, _name: &str) -> Option<u8> {
        None
    }

    fn class_name(&self, _id: u8) -> Option<String> {
        None
    }

    fn flowtype_id(&self, _name: &str) -> Option<u8> {
        None
    }

    fn flowtype_name(&self, _id: u8) -> Option<String> {
        None
    }
}

/// In-memory name tables.
#[derive(Debug, Clone, Default)]
pub struct SiteTable {
    sensors: HashMap<u16, String>,
    classes: HashMap<u8, String>,
    flowtypes: HashMap<u8, String>,
}

impl SiteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sensor(mut self, id: u16, name: impl Into<String>) -> Self {
        self.sensors.insert(id, name.into());
        self
    }

    pub fn with_class(mut self, id: u8, name: impl Into<String>) -> Self {
        self.classes.insert(id, name.into());
        self
    }

    pub fn with_flowtype(mut self, id: u8, name: impl Into<String>) -> Self {
        self.flowtypes.insert(id, name.into());
        self
    }
}

fn find_id<K: Copy>(table: &HashMap<K, String>, name: &str) -> Option<K> {
    table
        .iter()
        .find(|(_, known)| known.eq_ignore_ascii_case(name))
        .map(|(id, _)| *id)
}

impl SiteNames for SiteTable {
    fn sensor_id(&self, name: &str) -> Option<u16> {
        find_id(&self.sensors, name)
    }

    fn sensor_name(&self, id: u16) -> Option<String> {
        self.sensors.get(&id).cloned()
    }

    fn class_id(&self, name: &str) -> Option<u8> {
        find_id(&self.classes, name)
    }

    fn class_name(&self, id: u8) -> Option<String> {
        self.classes.get(&id).cloned()
    }

    fn flowtype_id(&self, name: &str) -> Option<u8> {
        find_id(&self.flowtypes, name)
    }

    fn flowtype_name(&self, id: u8) -> Option<String> {
        self.flowtypes.get(&id).cloned()
    }
}
