//! Account registry.
//!
//! Each account lives in its own key=value text file in the users directory:
//!
//! ```text
//! Token=<access token>
//! RefreshToken=<refresh token>
//! DataPath=<root directory for tick files>
//! AccountId=<resolved id, 0 until discovered>
//! EURUSD=1
//! GBPUSD=2
//! ```
//!
//! Every key other than the four reserved ones is a symbol name mapped to
//! its id.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tickrec_core::{Account, AccountId, Symbol, SymbolId};
use tracing::{debug, info};

use crate::error::{PersistenceError, PersistenceResult};

const TOKEN: &str = "Token";
const REFRESH_TOKEN: &str = "RefreshToken";
const ACCOUNT_ID: &str = "AccountId";
const DATA_PATH: &str = "DataPath";

/// Source and sink for recorded accounts.
pub trait AccountRegistry: Send + Sync {
    fn load_accounts(&self) -> PersistenceResult<Vec<Account>>;

    /// Persist the account's resolved id and symbol catalog.
    fn save_account(&self, account: &Account) -> PersistenceResult<()>;
}

/// Split `key=value` lines. Blank lines are ignored; the first `=` separates
/// key from value.
pub fn parse_key_values(text: &str, source: &Path) -> PersistenceResult<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(PersistenceError::Format {
                path: source.to_path_buf(),
                line: number + 1,
                reason: format!("expected key=value, found {line:?}"),
            });
        };
        pairs.push((key.trim().to_string(), value.trim().to_string()));
    }
    Ok(pairs)
}

/// Parse one account file.
pub fn parse_account(text: &str, source: &Path) -> PersistenceResult<Account> {
    let mut token = None;
    let mut refresh_token = None;
    let mut data_path = None;
    let mut account_id = AccountId::UNRESOLVED;
    let mut symbols = Vec::new();

    for (number, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let format_error = |reason: String| PersistenceError::Format {
            path: source.to_path_buf(),
            line: number + 1,
            reason,
        };
        let Some((key, value)) = line.trim().split_once('=') else {
            return Err(format_error(format!("expected key=value, found {line:?}")));
        };
        let (key, value) = (key.trim(), value.trim());

        match key {
            TOKEN => token = Some(value.to_string()),
            REFRESH_TOKEN => refresh_token = Some(value.to_string()),
            DATA_PATH => data_path = Some(PathBuf::from(value)),
            ACCOUNT_ID => {
                account_id = value
                    .parse()
                    .map_err(|_| format_error(format!("invalid account id {value:?}")))?;
            }
            name => {
                let id: SymbolId = value
                    .parse()
                    .map_err(|_| format_error(format!("invalid symbol id {value:?} for {name}")))?;
                symbols.push(Symbol::new(id, name));
            }
        }
    }

    let missing = |field| PersistenceError::MissingField {
        path: source.to_path_buf(),
        field,
    };
    let token = token.ok_or_else(|| missing(TOKEN))?;
    let refresh_token = refresh_token.ok_or_else(|| missing(REFRESH_TOKEN))?;
    let data_path = data_path.ok_or_else(|| missing(DATA_PATH))?;

    Ok(Account::new(token, refresh_token, data_path)
        .with_account_id(account_id)
        .with_symbols(symbols.into_iter().collect()))
}

/// Serialize an account in the file format read by `parse_account`.
pub fn format_account(account: &Account) -> String {
    let mut out = String::new();
    out.push_str(&format!("{TOKEN}={}\n", account.token));
    out.push_str(&format!("{REFRESH_TOKEN}={}\n", account.refresh_token));
    out.push_str(&format!("{DATA_PATH}={}\n", account.data_path.display()));
    out.push_str(&format!("{ACCOUNT_ID}={}\n", account.account_id));
    for symbol in &account.symbols {
        out.push_str(&format!("{}={}\n", symbol.name(), symbol.id()));
    }
    out
}

/// Registry backed by a directory of account files.
pub struct FileAccountRegistry {
    dir: PathBuf,
    /// Originating file per access token.
    files: RwLock<HashMap<String, PathBuf>>,
}

impl FileAccountRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, account: &Account) -> PathBuf {
        if let Some(path) = self.files.read().get(&account.token) {
            return path.clone();
        }
        self.dir.join(format!("{}.txt", account.account_id))
    }
}

impl AccountRegistry for FileAccountRegistry {
    fn load_accounts(&self) -> PersistenceResult<Vec<Account>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().map_or(true, |ext| ext != "tmp"))
            .collect();
        paths.sort();

        let mut files = HashMap::new();
        let mut accounts = Vec::with_capacity(paths.len());
        for path in paths {
            let text = std::fs::read_to_string(&path)?;
            let account = parse_account(&text, &path)?;
            if files.contains_key(&account.token) {
                return Err(PersistenceError::DuplicateToken { path });
            }
            debug!(path = %path.display(), token = %account.token_hint(), "Loaded account file");
            files.insert(account.token.clone(), path);
            accounts.push(account);
        }

        info!(dir = %self.dir.display(), count = accounts.len(), "Accounts loaded");
        *self.files.write() = files;
        Ok(accounts)
    }

    fn save_account(&self, account: &Account) -> PersistenceResult<()> {
        let path = self.path_for(account);
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, format_account(account))?;
        std::fs::rename(&tmp, &path)?;

        self.files
            .write()
            .insert(account.token.clone(), path.clone());
        info!(path = %path.display(), account = %account.account_id, "Account file saved");
        Ok(())
    }
}

/// In-memory registry that records every save.
#[derive(Default)]
pub struct MemoryAccountRegistry {
    accounts: Vec<Account>,
    saves: Mutex<Vec<Account>>,
    fail_saves: Mutex<bool>,
}

impl MemoryAccountRegistry {
    pub fn new(accounts: Vec<Account>) -> Self {
        Self {
            accounts,
            saves: Mutex::new(Vec::new()),
            fail_saves: Mutex::new(false),
        }
    }

    /// Make every subsequent save fail with an IO error.
    pub fn set_fail_saves(&self, fail: bool) {
        *self.fail_saves.lock() = fail;
    }

    pub fn saves(&self) -> Vec<Account> {
        self.saves.lock().clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.lock().len()
    }
}

impl AccountRegistry for MemoryAccountRegistry {
    fn load_accounts(&self) -> PersistenceResult<Vec<Account>> {
        Ok(self.accounts.clone())
    }

    fn save_account(&self, account: &Account) -> PersistenceResult<()> {
        if *self.fail_saves.lock() {
            return Err(PersistenceError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "save disabled",
            )));
        }
        self.saves.lock().push(account.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = "Token=abc123\nRefreshToken=ref456\nAccountId=0\nDataPath=/data/ticks\nEURUSD=1\nGBPUSD=2\n";

    #[test]
    fn test_parse_account() {
        let account = parse_account(SAMPLE, Path::new("user.txt")).unwrap();
        assert_eq!(account.token, "abc123");
        assert_eq!(account.refresh_token, "ref456");
        assert_eq!(account.account_id, AccountId::UNRESOLVED);
        assert_eq!(account.data_path, PathBuf::from("/data/ticks"));
        assert_eq!(account.symbols.len(), 2);
        assert_eq!(account.symbols.name_of(SymbolId::new(2)), Some("GBPUSD"));
    }

    #[test]
    fn test_parse_missing_token() {
        let err = parse_account("RefreshToken=r\nDataPath=/d\n", Path::new("u.txt")).unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::MissingField { field: "Token", .. }
        ));
    }

    #[test]
    fn test_parse_bad_symbol_id() {
        let err = parse_account("Token=t\nRefreshToken=r\nDataPath=/d\nEURUSD=one\n", Path::new("u.txt"))
            .unwrap_err();
        assert!(matches!(err, PersistenceError::Format { line: 4, .. }));
    }

    #[test]
    fn test_parse_line_without_separator() {
        let err = parse_account("Token=t\ngarbage\n", Path::new("u.txt")).unwrap_err();
        assert!(matches!(err, PersistenceError::Format { line: 2, .. }));
    }

    #[test]
    fn test_format_parses_back() {
        let account = parse_account(SAMPLE, Path::new("user.txt"))
            .unwrap()
            .with_account_id(AccountId::new(555));
        let text = format_account(&account);
        assert!(text.contains("AccountId=555\n"));
        assert_eq!(parse_account(&text, Path::new("user.txt")).unwrap(), account);
    }

    #[test]
    fn test_parse_key_values() {
        let pairs = parse_key_values("a=1\n\nb = two=2\n", Path::new("c.txt")).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "two=2".to_string())
            ]
        );
    }

    #[test]
    fn test_file_registry_saves_to_originating_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("alice.txt");
        std::fs::write(&path, SAMPLE).unwrap();

        let registry = FileAccountRegistry::new(dir.path());
        let accounts = registry.load_accounts().unwrap();
        assert_eq!(accounts.len(), 1);

        let resolved = accounts[0].clone().with_account_id(AccountId::new(555));
        registry.save_account(&resolved).unwrap();

        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
        let reloaded = registry.load_accounts().unwrap();
        assert_eq!(reloaded[0].account_id, AccountId::new(555));
        assert_eq!(reloaded[0].symbols.len(), 2);
    }

    #[test]
    fn test_file_registry_rejects_duplicate_tokens() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), SAMPLE).unwrap();
        std::fs::write(dir.path().join("b.txt"), SAMPLE).unwrap();

        let registry = FileAccountRegistry::new(dir.path());
        assert!(matches!(
            registry.load_accounts(),
            Err(PersistenceError::DuplicateToken { .. })
        ));
    }

    #[test]
    fn test_memory_registry_records_saves() {
        let account = parse_account(SAMPLE, Path::new("user.txt")).unwrap();
        let registry = MemoryAccountRegistry::new(vec![account.clone()]);

        registry.save_account(&account).unwrap();
        assert_eq!(registry.save_count(), 1);

        registry.set_fail_saves(true);
        assert!(registry.save_account(&account).is_err());
        assert_eq!(registry.save_count(), 1);
    }
}
