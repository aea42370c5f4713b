//! Login/session status board read by the HTTP status surface.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{domain::Contact, events::ScanStatus};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatusSnapshot {
    /// Scan code waiting to be scanned, if any.
    pub scan_code: Option<String>,
    pub last_scan_status: Option<ScanStatus>,
    pub user: Option<Contact>,
}

#[derive(Debug, Default)]
pub struct SessionStatus {
    inner: RwLock<StatusSnapshot>,
}

impl SessionStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record scan progress. The code is only kept while the account waits
    /// for it to be scanned.
    pub fn on_scan(&self, code: &str, status: ScanStatus) {
        let mut st = self.write();
        st.last_scan_status = Some(status);
        match status {
            ScanStatus::Waiting => st.scan_code = Some(code.to_string()),
            ScanStatus::Scanned => {}
            _ => st.scan_code = None,
        }
    }

    pub fn on_login(&self, user: &Contact) {
        let mut st = self.write();
        st.scan_code = None;
        st.user = Some(user.clone());
    }

    pub fn on_logout(&self) {
        self.write().user = None;
    }

    pub fn scan_code(&self) -> Option<String> {
        self.read().scan_code.clone()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.read().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, StatusSnapshot> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StatusSnapshot> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}
