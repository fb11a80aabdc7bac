//! Caller-held expectation of an entity's ref values.
//!
//! Text form:
//!
//! - `N`: the history store is authoritative; there is nothing to compare.
//! - `[R,]<meta-hex>[,<account>=<annex-hex>]*`: the snapshot holder is
//!   authoritative and the store must still show these values. The `R,`
//!   prefix is accepted but never rendered.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use revlog_types::{AccountId, ObjectId, TypeError};

/// Which side holds the truth about an entity's state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Authority {
    /// The history store. Expected values are not checked.
    Store,
    /// The snapshot. The store must match it.
    Snapshot,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpectedState {
    authority: Authority,
    meta: ObjectId,
    annex: BTreeMap<AccountId, ObjectId>,
}

impl ExpectedState {
    pub fn store_authoritative() -> Self {
        Self {
            authority: Authority::Store,
            meta: ObjectId::null(),
            annex: BTreeMap::new(),
        }
    }

    /// Expect the metadata ref at `meta`, and no annex refs unless added.
    pub fn snapshot(meta: ObjectId) -> Self {
        Self {
            authority: Authority::Snapshot,
            meta,
            annex: BTreeMap::new(),
        }
    }

    pub fn with_annex(mut self, account: AccountId, id: ObjectId) -> Self {
        if !id.is_null() {
            self.annex.insert(account, id);
        }
        self
    }

    pub fn authority(&self) -> Authority {
        self.authority
    }

    pub fn meta(&self) -> ObjectId {
        self.meta
    }

    /// Expected annex value for `account`; null when none is listed.
    pub fn annex(&self, account: AccountId) -> ObjectId {
        self.annex.get(&account).copied().unwrap_or_default()
    }

    pub fn is_meta_up_to_date(&self, actual: ObjectId) -> bool {
        self.authority == Authority::Store || self.meta == actual
    }

    pub fn is_annex_up_to_date(&self, account: AccountId, actual: ObjectId) -> bool {
        self.authority == Authority::Store || self.annex(account) == actual
    }
}

impl fmt::Display for ExpectedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.authority == Authority::Store {
            return f.write_str("N");
        }
        write!(f, "{}", self.meta)?;
        for (account, id) in &self.annex {
            write!(f, ",{account}={id}")?;
        }
        Ok(())
    }
}

impl FromStr for ExpectedState {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TypeError::InvalidId {
            what: "expected state",
            value: s.to_string(),
        };
        if s == "N" {
            return Ok(Self::store_authoritative());
        }
        let mut parts = s.split(',');
        let mut first = parts.next().ok_or_else(invalid)?;
        if first == "R" {
            first = parts.next().ok_or_else(invalid)?;
        }
        let mut state = Self::snapshot(ObjectId::from_hex(first)?);
        for part in parts {
            let (account, id) = part.split_once('=').ok_or_else(invalid)?;
            state = state.with_annex(account.parse()?, ObjectId::from_hex(id)?);
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(n: u32) -> AccountId {
        AccountId::new(n).unwrap()
    }

    #[test]
    fn store_authority_skips_checks() {
        let state: ExpectedState = "N".parse().unwrap();
        assert_eq!(state.authority(), Authority::Store);
        assert!(state.is_meta_up_to_date(ObjectId::from_bytes(b"anything")));
        assert!(state.is_annex_up_to_date(account(1), ObjectId::from_bytes(b"x")));
        assert_eq!(state.to_string(), "N");
    }

    #[test]
    fn snapshot_text_form() {
        let meta = ObjectId::from_bytes(b"meta");
        let draft = ObjectId::from_bytes(b"draft");
        let state = ExpectedState::snapshot(meta).with_annex(account(1000001), draft);
        let text = state.to_string();
        assert_eq!(text, format!("{},1000001={}", meta.to_hex(), draft.to_hex()));
        assert_eq!(text.parse::<ExpectedState>().unwrap(), state);
        assert_eq!(
            format!("R,{text}").parse::<ExpectedState>().unwrap(),
            state
        );
    }

    #[test]
    fn snapshot_compares() {
        let meta = ObjectId::from_bytes(b"meta");
        let state = ExpectedState::snapshot(meta);
        assert!(state.is_meta_up_to_date(meta));
        assert!(!state.is_meta_up_to_date(ObjectId::null()));
        // Unlisted accounts are expected to have no annex ref.
        assert!(state.is_annex_up_to_date(account(5), ObjectId::null()));
        assert!(!state.is_annex_up_to_date(account(5), meta));
    }

    #[test]
    fn malformed_text_rejected() {
        assert!("".parse::<ExpectedState>().is_err());
        assert!("R".parse::<ExpectedState>().is_err());
        assert!("zz".parse::<ExpectedState>().is_err());
        let meta = ObjectId::from_bytes(b"m").to_hex();
        assert!(format!("{meta},7").parse::<ExpectedState>().is_err());
        assert!(format!("{meta},0={meta}").parse::<ExpectedState>().is_err());
    }
}
