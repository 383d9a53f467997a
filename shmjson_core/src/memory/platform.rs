// Cross-platform shared memory path abstraction
//
// Linux: /dev/shm/shmjson (tmpfs - RAM-backed, fastest)
// macOS: /tmp/shmjson (no /dev/shm, but /tmp is still fast for IPC)

use std::path::PathBuf;

/// Get the base directory for shmjson segments
///
/// This returns a platform-appropriate path for shared memory:
/// - Linux: `/dev/shm/shmjson` (tmpfs for maximum performance)
/// - macOS: `/tmp/shmjson` (no /dev/shm, but /tmp is still fast)
pub fn shm_base_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/dev/shm/shmjson")
    }

    #[cfg(target_os = "macos")]
    {
        PathBuf::from("/tmp/shmjson")
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        // Fallback for other Unix-like systems (BSD, etc.)
        PathBuf::from("/tmp/shmjson")
    }
}

/// Path of the backing file for the segment with the given numeric key
pub fn segment_path(key: u32) -> PathBuf {
    shm_base_dir().join(format!("seg_{:08x}", key))
}

/// Name of the POSIX semaphore serializing cold-path builds for a key
pub fn semaphore_name(key: u32) -> String {
    format!("/shmjson_{:08x}", key)
}

/// Check if we're running on a platform with true shared memory (tmpfs)
pub fn has_native_shm() -> bool {
    #[cfg(target_os = "linux")]
    {
        true
    }

    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_valid() {
        let base = shm_base_dir();
        assert!(!base.as_os_str().is_empty());

        let seg = segment_path(0xdeadbeef);
        assert!(seg.starts_with(&base));
        assert!(seg.to_string_lossy().ends_with("seg_deadbeef"));
    }

    #[test]
    fn test_semaphore_name_is_slash_prefixed() {
        let name = semaphore_name(42);
        assert!(name.starts_with('/'));
        assert!(!name[1..].contains('/'));
    }
}
