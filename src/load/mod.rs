//! Write load: the workload generator seam and the percentage-sized fill driver.

pub mod driver;
pub mod workload;
