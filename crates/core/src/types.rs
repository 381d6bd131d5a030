/// Index of a locally managed backend (one per GPU).
pub type DeviceIndex = usize;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Upper bound on the number of devices a single process manages.
pub const MAX_DEVICES: usize = 8;
