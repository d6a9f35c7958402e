//! 单例文件锁
//!
//! 同一台机器人只允许一个协调器实例，否则两个实例可能交替切换控制器。

use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// 单例文件锁
///
/// 进程退出（包括崩溃）时操作系统自动释放锁。
pub struct SingletonLock {
    file: File,
    path: PathBuf,
}

impl SingletonLock {
    /// 尝试获取单例锁（非阻塞）
    ///
    /// 锁已被其他进程持有时返回 `AlreadyExists`。
    pub fn try_lock(lock_path: impl AsRef<Path>) -> io::Result<Self> {
        let path = lock_path.as_ref();

        // 拿到锁之前不能截断，文件里可能是持有者的 PID
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .read(true)
            .open(path)?;

        if !file.try_lock_exclusive()? {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("mannequin-server is already running ({})", path.display()),
            ));
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(&file, "{}", std::process::id())?;
        file.sync_all()?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SingletonLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// 默认锁文件路径
///
/// 依次尝试运行时目录（XDG_RUNTIME_DIR）、缓存目录、系统临时目录。
pub fn default_lock_path() -> PathBuf {
    const FILE_NAME: &str = "mannequin_server.lock";

    if let Some(dir) = dirs::runtime_dir()
        && (dir.exists() || std::fs::create_dir_all(&dir).is_ok())
    {
        return dir.join(FILE_NAME);
    }

    if let Some(cache) = dirs::cache_dir() {
        let dir = cache.join("mannequin");
        if std::fs::create_dir_all(&dir).is_ok() {
            return dir.join(FILE_NAME);
        }
    }

    std::env::temp_dir().join(FILE_NAME)
}
