//! File-system helpers with the permissions the formats require
//! (0600 files, 0750 directories).

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Create a directory (and parents) with mode 0750.
pub fn create_dir_secure(dir: &Path) -> io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o750);
    }
    builder.create(dir)
}

/// Create a brand-new file with mode 0600, open for read+write.
pub fn create_file_secure(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create_new(true).read(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

/// Fsync a directory so a rename within it is durable.
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}
