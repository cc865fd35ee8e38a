//! Password-file authority.
//!
//! The credential file holds `user:secret` lines; the group file holds
//! `level:user,user,...` lines where the level is one of the access-level
//! names. A user's granted level is the highest group listing them, and
//! read when no group does. Lines starting with `#` and blank lines are
//! ignored in both files.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use tracing::warn;

use graphgate_protocol::AccessLevel;

use super::{AUTH_TARGET, Authority};

pub(crate) struct PasswordAuthority {
    secrets: HashMap<String, String>,
    levels: HashMap<String, AccessLevel>,
}

impl PasswordAuthority {
    /// Loads the authority from its two files.
    pub fn load(passwd_file: &Path, group_file: &Path) -> io::Result<Self> {
        let passwd = fs::read_to_string(passwd_file)?;
        let groups = fs::read_to_string(group_file)?;
        Ok(Self::from_contents(&passwd, &groups))
    }

    /// Builds the authority from file contents.
    pub fn from_contents(passwd: &str, groups: &str) -> Self {
        let mut secrets = HashMap::new();
        for line in data_lines(passwd) {
            match line.split_once(':') {
                Some((user, secret)) => {
                    secrets.insert(user.trim().to_string(), secret.trim().to_string());
                }
                None => {
                    warn!(target: AUTH_TARGET, line, "ignoring malformed credential line");
                }
            }
        }

        let mut levels: HashMap<String, AccessLevel> = HashMap::new();
        for line in data_lines(groups) {
            let Some((level_name, members)) = line.split_once(':') else {
                warn!(target: AUTH_TARGET, line, "ignoring malformed group line");
                continue;
            };
            let level = match AccessLevel::parse(level_name.trim()) {
                Ok(level) => level,
                Err(error) => {
                    warn!(target: AUTH_TARGET, %error, "ignoring group with unknown level");
                    continue;
                }
            };
            for member in members.split(',') {
                let member = member.trim();
                if member.is_empty() {
                    continue;
                }
                let entry = levels.entry(member.to_string()).or_insert(level);
                if *entry < level {
                    *entry = level;
                }
            }
        }

        Self { secrets, levels }
    }
}

impl Authority for PasswordAuthority {
    fn name(&self) -> &str {
        "password"
    }

    fn authorize(&self, credentials: &str) -> Option<AccessLevel> {
        let (user, secret) = credentials.split_once(':')?;
        let stored = self.secrets.get(user)?;
        if stored != secret {
            return None;
        }
        Some(
            self.levels
                .get(user)
                .copied()
                .unwrap_or(AccessLevel::Read),
        )
    }
}

fn data_lines(contents: &str) -> impl Iterator<Item = &str> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn authority() -> PasswordAuthority {
        PasswordAuthority::from_contents(
            "# operators\nalice:wonder\nbob:builder\ncarol:pass\n",
            "# groups\nadmin:alice\nwrite:bob, carol\nread:carol\n",
        )
    }

    #[rstest]
    #[case("alice:wonder", Some(AccessLevel::Admin))]
    #[case("bob:builder", Some(AccessLevel::Write))]
    #[case("carol:pass", Some(AccessLevel::Write))]
    #[case("alice:wrong", None)]
    #[case("mallory:wonder", None)]
    #[case("no-separator", None)]
    fn authorizes_credentials(
        #[case] credentials: &str,
        #[case] expected: Option<AccessLevel>,
    ) {
        assert_eq!(authority().authorize(credentials), expected);
    }

    #[test]
    fn user_without_group_gets_read() {
        let authority =
            PasswordAuthority::from_contents("dave:secret\n", "admin:alice\n");
        assert_eq!(authority.authorize("dave:secret"), Some(AccessLevel::Read));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let authority = PasswordAuthority::from_contents(
            "good:secret\nbad-line\n",
            "bogus-level:good\nnot a group\n",
        );
        assert_eq!(authority.authorize("good:secret"), Some(AccessLevel::Read));
    }
}
