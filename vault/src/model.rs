//! Account records as stored in the vault.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

/// Offset between a 64-bit profile id and the 32-bit account id.
pub const PROFILE_ID_BASE: u64 = 76_561_197_960_265_728;

/// Second-factor material attached to an account. Its presence protects the
/// record from removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatorPayload {
    pub shared_secret: String,
    pub identity_secret: Option<String>,
    pub revocation_code: Option<String>,
    pub device_id: Option<String>,
}

impl AuthenticatorPayload {
    pub fn new(shared_secret: impl Into<String>) -> VaultResult<Self> {
        let payload = Self {
            shared_secret: shared_secret.into(),
            identity_secret: None,
            revocation_code: None,
            device_id: None,
        };
        payload.validate()?;
        Ok(payload)
    }

    pub(crate) fn validate(&self) -> VaultResult<()> {
        if self.shared_secret.is_empty() {
            return Err(VaultError::CorruptData("authenticator without shared secret".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanSummary {
    pub community_banned: bool,
    pub vac_bans: u32,
    pub game_bans: u32,
    pub economy_ban: u32,
    pub days_since_last_ban: u32,
}

impl BanSummary {
    pub fn is_clean(&self) -> bool {
        !self.community_banned && self.vac_bans == 0 && self.game_bans == 0 && self.economy_ban == 0
    }
}

/// Profile data filled in by the external enrichment service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileInfo {
    pub avatar_hash: Option<String>,
    pub level: Option<u32>,
    pub created_at: Option<DateTime<Utc>>,
    pub bans: BanSummary,
}

/// Result of a profile refresh. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub nickname: Option<String>,
    pub avatar_hash: Option<String>,
    pub level: Option<u32>,
    pub created_at: Option<DateTime<Utc>>,
    pub bans: Option<BanSummary>,
    /// Stamp `updated_at` with the current time.
    pub mark_updated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub login: String,
    pub password: String,
    pub profile_id: Option<u64>,
    pub nickname: String,
    pub note: Option<String>,
    pub authenticator: Option<AuthenticatorPayload>,
    pub pinned: bool,
    /// Offset inside the unpinned region recorded at pin time.
    pub unpin_index: u32,
    pub added_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub profile: ProfileInfo,
}

impl AccountRecord {
    /// New unpinned record; the nickname starts out as the login.
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> VaultResult<Self> {
        let login = login.into();
        let record = Self {
            nickname: login.clone(),
            login,
            password: password.into(),
            profile_id: None,
            note: None,
            authenticator: None,
            pinned: false,
            unpin_index: 0,
            added_at: Utc::now(),
            updated_at: None,
            profile: ProfileInfo::default(),
        };
        record.validate()?;
        Ok(record)
    }

    pub fn with_profile_id(mut self, profile_id: u64) -> Self {
        self.profile_id = Some(profile_id);
        self
    }

    /// Builds the profile id from a 32-bit account id.
    pub fn with_account_id(self, account_id: u32) -> Self {
        self.with_profile_id(PROFILE_ID_BASE + u64::from(account_id))
    }

    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = nickname.into();
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_authenticator(mut self, authenticator: AuthenticatorPayload) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// 32-bit account id derived from the profile id.
    pub fn account_id(&self) -> Option<u32> {
        self.profile_id
            .and_then(|id| id.checked_sub(PROFILE_ID_BASE))
            .and_then(|id| u32::try_from(id).ok())
    }

    pub fn has_authenticator(&self) -> bool {
        self.authenticator.is_some()
    }

    /// Applies an enrichment result. Login, profile id and pin state are never
    /// touched.
    pub fn apply_profile(&mut self, update: ProfileUpdate) {
        if let Some(nickname) = update.nickname {
            self.nickname = nickname;
        }
        if update.avatar_hash.is_some() {
            self.profile.avatar_hash = update.avatar_hash;
        }
        if update.level.is_some() {
            self.profile.level = update.level;
        }
        if update.created_at.is_some() {
            self.profile.created_at = update.created_at;
        }
        if let Some(bans) = update.bans {
            self.profile.bans = bans;
        }
        if update.mark_updated {
            self.updated_at = Some(Utc::now());
        }
    }

    pub(crate) fn validate(&self) -> VaultResult<()> {
        if self.login.is_empty() {
            return Err(VaultError::CorruptData("account without login".to_string()));
        }
        if let Some(authenticator) = &self.authenticator {
            authenticator.validate()?;
        }
        Ok(())
    }
}
