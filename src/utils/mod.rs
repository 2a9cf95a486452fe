pub(crate) mod cache;
pub(crate) mod comparator;
pub(crate) mod crc;
pub(crate) mod io;
