use crate::element::ElementSnapshot;
use crate::errors::AutomationError;
use std::fmt;
use std::str::FromStr;

pub const AUTOMATION_ID_SCORE: u32 = 100;
pub const NAME_EXACT_SCORE: u32 = 80;
pub const NAME_PREFIX_SCORE: u32 = 50;
pub const VISIBLE_BONUS: u32 = 20;
pub const ENABLED_BONUS: u32 = 10;
pub const AREA_BONUS: u32 = 5;

/// Compact `Role#Identifier` selector.
///
/// The role is optional (`#Identifier` or a bare `Identifier` match any role).
/// The identifier is compared against the automation id and the display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selector {
    pub role: Option<String>,
    pub identifier: String,
}

/// Which property matched, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchKind {
    NamePrefix,
    NameExact,
    AutomationId,
}

impl MatchKind {
    pub fn base_score(&self) -> u32 {
        match self {
            MatchKind::AutomationId => AUTOMATION_ID_SCORE,
            MatchKind::NameExact => NAME_EXACT_SCORE,
            MatchKind::NamePrefix => NAME_PREFIX_SCORE,
        }
    }
}

impl Selector {
    pub fn parse(s: &str) -> Result<Self, AutomationError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AutomationError::InvalidSelector(
                "selector is empty".to_string(),
            ));
        }

        let (role, identifier) = match s.split_once('#') {
            Some((role, identifier)) => {
                let role = role.trim();
                (
                    (!role.is_empty()).then(|| role.to_string()),
                    identifier.trim(),
                )
            }
            None => (None, s),
        };

        if identifier.is_empty() {
            return Err(AutomationError::InvalidSelector(format!(
                "selector \"{s}\" has no identifier. Use 'Role#Identifier' or '#Identifier'"
            )));
        }

        Ok(Selector {
            role,
            identifier: identifier.to_string(),
        })
    }

    pub fn matches_role(&self, role: &str) -> bool {
        self.role
            .as_deref()
            .map_or(true, |wanted| wanted.eq_ignore_ascii_case(role))
    }

    /// Best property match of this selector against a snapshot, ignoring role.
    ///
    /// The automation id is compared exactly; names are compared
    /// case-insensitively. Prefix matches (`"Save "`, `"Save("`) only count
    /// outside exact mode.
    pub fn match_kind(&self, snapshot: &ElementSnapshot, exact: bool) -> Option<MatchKind> {
        if !snapshot.automation_id.is_empty() && snapshot.automation_id == self.identifier {
            return Some(MatchKind::AutomationId);
        }

        let name = snapshot.name.trim().to_lowercase();
        if name.is_empty() {
            return None;
        }
        let wanted = self.identifier.to_lowercase();
        if name == wanted {
            return Some(MatchKind::NameExact);
        }
        if !exact
            && (name.starts_with(&format!("{wanted} ")) || name.starts_with(&format!("{wanted}(")))
        {
            return Some(MatchKind::NamePrefix);
        }
        None
    }

    /// Base score plus actionability bonuses. Zero means "not a candidate".
    pub fn score(&self, snapshot: &ElementSnapshot, exact: bool) -> u32 {
        if !self.matches_role(&snapshot.role) {
            return 0;
        }
        let Some(kind) = self.match_kind(snapshot, exact) else {
            return 0;
        };

        let mut score = kind.base_score();
        if snapshot.visible {
            score += VISIBLE_BONUS;
        }
        if snapshot.enabled {
            score += ENABLED_BONUS;
        }
        if !snapshot.bounds.is_empty() {
            score += AREA_BONUS;
        }
        score
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.role {
            Some(role) => write!(f, "{role}#{}", self.identifier),
            None => write!(f, "#{}", self.identifier),
        }
    }
}

impl FromStr for Selector {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Selector::parse(s)
    }
}

impl TryFrom<&str> for Selector {
    type Error = AutomationError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Selector::parse(s)
    }
}
