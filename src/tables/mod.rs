/*!
Table files hold immutable, sorted runs of entries on disk.

A table file is a sequence of data blocks followed by an index of the first key in each block and a
fixed-length footer. Refer to [`TableBuilder`] for the full layout.
*/

pub(crate) mod errors;

mod block;
mod block_builder;
mod block_handle;
mod constants;
mod footer;

pub(crate) mod table;
pub(crate) use table::{Table, TableIterator};

pub(crate) mod table_builder;
pub(crate) use table_builder::TableBuilder;

use block_builder::BlockBuilder;
