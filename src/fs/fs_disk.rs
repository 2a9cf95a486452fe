/*!
The [`FileSystem`] backed by the local disk through [`std::fs`].
*/

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::traits::{FileLock, FileSystem, LockedFile, RandomAccessFile, ReadonlyRandomAccessFile};

impl ReadonlyRandomAccessFile for File {
    #[cfg(unix)]
    fn read_from(&self, buf: &mut [u8], offset: usize) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset as u64)
    }

    #[cfg(windows)]
    fn read_from(&self, buf: &mut [u8], offset: usize) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset as u64)
    }

    fn len(&self) -> io::Result<u64> {
        self.metadata().map(|metadata| metadata.len())
    }
}

impl RandomAccessFile for File {
    fn append(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.seek(SeekFrom::End(0))?;
        self.write_all(buf)?;

        Ok(buf.len())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.flush()?;
        self.sync_data()
    }
}

impl LockedFile for File {
    fn release(&self) -> io::Result<()> {
        FileExt::unlock(self)
    }
}

/// Stores database files on the local disk.
#[derive(Debug, Default)]
pub struct OsFileSystem {}

/// Public methods
impl OsFileSystem {
    /// Create a new [`OsFileSystem`].
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileSystem for OsFileSystem {
    fn name(&self) -> &'static str {
        "OsFileSystem"
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut paths: Vec<PathBuf> = vec![];
        for dir_entry in fs::read_dir(path)? {
            paths.push(dir_entry?.path());
        }
        paths.sort();

        Ok(paths)
    }

    fn open_file(&self, path: &Path) -> io::Result<Box<dyn ReadonlyRandomAccessFile>> {
        Ok(Box::new(File::open(path)?))
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn create_file(&self, path: &Path, append: bool) -> io::Result<Box<dyn RandomAccessFile>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .append(append)
            .truncate(!append)
            .open(path)?;

        Ok(Box::new(file))
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn get_file_size(&self, path: &Path) -> io::Result<u64> {
        fs::metadata(path).map(|metadata| metadata.len())
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn lock_file(&self, path: &Path) -> io::Result<FileLock> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        file.try_lock_exclusive()?;
        log::info!("Acquired the lock on {:?}.", path);

        Ok(FileLock::new(Box::new(file), path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::io::Read;

    use super::*;

    #[test]
    fn create_dir_all_creates_missing_parents() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_system = OsFileSystem::new();
        let wal_dir = temp_dir.path().join("db").join("wal");

        file_system.create_dir_all(&wal_dir).unwrap();
        // Creating an existing directory is not an error
        file_system.create_dir_all(&wal_dir).unwrap();

        assert!(wal_dir.is_dir());
        assert_eq!(
            file_system.list_dir(&temp_dir.path().join("db")).unwrap(),
            vec![wal_dir]
        );
    }

    #[test]
    fn appended_bytes_can_be_read_sequentially_and_by_offset() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_system = OsFileSystem::new();
        let file_path = temp_dir.path().join("1.wal");

        let mut file = file_system.create_file(&file_path, false).unwrap();
        file.append(b"batmann").unwrap();
        file.append(b" and robin").unwrap();
        file.sync().unwrap();
        assert_eq!(file_system.get_file_size(&file_path).unwrap(), 17);

        // Reopening for appends keeps the existing contents
        let mut file = file_system.create_file(&file_path, true).unwrap();
        file.append(b"!").unwrap();
        file.sync().unwrap();

        let mut reader = file_system.open_file(&file_path).unwrap();
        let mut contents = String::new();
        reader.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "batmann and robin!");

        let mut partial = [0_u8; 5];
        reader.read_from(&mut partial, 12).unwrap();
        assert_eq!(&partial, b"robin");
        assert_eq!(reader.len().unwrap(), 18);
    }

    #[test]
    fn remove_and_rename_operate_on_existing_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_system = OsFileSystem::new();
        let temp_path = temp_dir.path().join("3.dbtemp");
        let current_path = temp_dir.path().join("CURRENT");

        file_system.create_file(&temp_path, false).unwrap();
        file_system.rename(&temp_path, &current_path).unwrap();
        assert!(!file_system.exists(&temp_path));
        assert!(file_system.exists(&current_path));

        file_system.remove_file(&current_path).unwrap();
        assert!(file_system.list_dir(temp_dir.path()).unwrap().is_empty());
        assert!(file_system.remove_file(&current_path).is_err());
    }

    #[test]
    fn a_locked_file_cannot_be_locked_again_until_released() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_system = OsFileSystem::new();
        let lock_path = temp_dir.path().join("LOCK");

        let lock = file_system.lock_file(&lock_path).unwrap();
        assert_eq!(lock.path(), lock_path.as_path());
        assert!(file_system.lock_file(&lock_path).is_err());

        drop(lock);
        assert!(file_system.lock_file(&lock_path).is_ok());
    }
}
