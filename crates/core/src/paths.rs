use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".tabrelay"))
            .unwrap_or_else(|| PathBuf::from(".tabrelay"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_dirs_creates_only_base() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base(dir.path().join("relay"));
        paths.ensure_dirs().unwrap();
        paths.ensure_dirs().unwrap();

        let entries: Vec<_> = std::fs::read_dir(&paths.base).unwrap().collect();
        assert!(entries.is_empty());
        assert_eq!(paths.config_file(), dir.path().join("relay").join("config.json"));
    }
}
