/*!
File system wrappers to enable different implementations of file systems to be used.

The database performs every file operation through a [`FileSystem`] so that embedders can
substitute the storage backend.
*/

mod traits;
pub use self::traits::{FileLock, FileSystem, LockedFile, RandomAccessFile, ReadonlyRandomAccessFile};

mod fs_disk;
pub use self::fs_disk::OsFileSystem;
