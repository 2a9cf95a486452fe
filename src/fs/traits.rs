use std::fmt;
use std::io::{Read, Result, Seek, Write};
use std::path::{Path, PathBuf};

/**
A file opened for reading.

Table files are read with positional reads so a single handle can be shared by concurrent readers.
Log files are read sequentially through [`Read`].
*/
pub trait ReadonlyRandomAccessFile: Read + Seek + Send + Sync {
    /// Fill `buf` with the bytes found at `offset`. Returns the number of bytes read.
    fn read_from(&self, buf: &mut [u8], offset: usize) -> Result<usize>;

    /// Get the length of the file in bytes.
    fn len(&self) -> Result<u64>;

    /// Returns true if the file holds no bytes.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// A file opened for writing. Bytes are only ever added to the end of the file.
pub trait RandomAccessFile: ReadonlyRandomAccessFile + Write {
    /// Write all of `buf` to the end of the file. Returns the number of bytes written.
    fn append(&mut self, buf: &[u8]) -> Result<usize>;

    /// Persist everything written so far to stable storage.
    fn sync(&mut self) -> Result<()>;
}

/**
The storage backend of a database.

Every file the database touches is reached through this trait. Paths are always absolute paths
under the database directory.
*/
pub trait FileSystem: Send + Sync {
    /// A short name identifying the backend in logs.
    fn name(&self) -> &'static str;

    /// Create the directory at `path` along with any missing parents.
    fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Get the paths of the entries of the directory at `path`, sorted.
    fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Open an existing file for reading.
    fn open_file(&self, path: &Path) -> Result<Box<dyn ReadonlyRandomAccessFile>>;

    /// Atomically replace `to` with `from`.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /**
    Open a file for writing, creating it if it is missing.

    If `append` is false, any existing contents are discarded.
    */
    fn create_file(&self, path: &Path, append: bool) -> Result<Box<dyn RandomAccessFile>>;

    /// Delete the file at `path`.
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Get the size of the file at `path` in bytes.
    fn get_file_size(&self, path: &Path) -> Result<u64>;

    /// Returns true if anything exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /**
    Take an exclusive, advisory lock on the file at `path`, creating the file if needed.

    Fails immediately if the lock is held through any other handle, including handles in the same
    process.
    */
    fn lock_file(&self, path: &Path) -> Result<FileLock>;
}

impl fmt::Debug for dyn FileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A lock held on a file. The lock is released when this is dropped.
pub struct FileLock {
    /// The locked file.
    file: Box<dyn LockedFile>,

    /// Path of the locked file.
    path: PathBuf,
}

impl FileLock {
    /// Wrap a file that is locked.
    pub fn new(file: Box<dyn LockedFile>, path: PathBuf) -> Self {
        Self { file, path }
    }

    /// Get the path of the locked file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for FileLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileLock").field("path", &self.path).finish()
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        match self.file.release() {
            Ok(()) => log::info!("Released the lock on {:?}.", self.path),
            Err(release_err) => log::error!(
                "Failed to release the lock on {:?}. Error: {}",
                self.path,
                release_err
            ),
        }
    }
}

/// A file with a lock that can be released.
pub trait LockedFile: Send + Sync {
    /// Release the lock.
    fn release(&self) -> Result<()>;
}
