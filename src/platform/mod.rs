use std::path::PathBuf;

use anyhow::{Result, anyhow};

/// Home directory used for the config file and log directory.
pub fn effective_home_dir() -> Result<PathBuf> {
    home_dir_from(|key| std::env::var_os(key))
}

fn home_dir_from<F>(var: F) -> Result<PathBuf>
where
    F: Fn(&str) -> Option<std::ffi::OsString>,
{
    for key in ["HOME", "USERPROFILE"] {
        if let Some(v) = var(key).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(v));
        }
    }
    Err(anyhow!("環境変数 HOME が設定されていません"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    #[test]
    fn home_falls_back_to_userprofile() {
        let home = home_dir_from(|key| match key {
            "HOME" => Some(OsString::new()),
            "USERPROFILE" => Some(OsString::from("C:\\Users\\op")),
            _ => None,
        })
        .expect("home");
        assert_eq!(home, PathBuf::from("C:\\Users\\op"));

        assert!(home_dir_from(|_| None).is_err());
    }
}
