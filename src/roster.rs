//! Channel roster reconciliation.
//!
//! The SBS side reports membership as whole snapshots. The client only
//! understands incremental JOIN/PART events, so every new snapshot is
//! diffed against the previous one and turned into directives for the
//! channels the client actually sits in.

use std::collections::{BTreeMap, BTreeSet};

/// Channel name (with `#`) to member uids.
pub type Roster = BTreeMap<String, BTreeSet<u64>>;

pub const CHANNEL_PREFIX: char = '#';

/// One roster change to show the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// A joined channel no longer exists; the client must leave it.
    PartChannel(String),
    UserJoined { channel: String, uid: u64 },
    UserLeft { channel: String, uid: u64 },
    /// Channels that did not exist in the previous snapshot.
    NewChannelsAvailable(Vec<String>),
}

/// Build the merged roster: every tag is a channel holding all online
/// users, and every room is a channel of its own. A room shadows a tag of
/// the same name.
pub fn merge(
    tags: &[String],
    online: &BTreeSet<u64>,
    rooms: &BTreeMap<String, BTreeSet<u64>>,
) -> Roster {
    let mut roster: Roster = tags
        .iter()
        .map(|tag| (channel_name(tag), online.clone()))
        .collect();
    for (room, members) in rooms {
        roster.insert(channel_name(room), members.clone());
    }
    roster
}

/// `tag` -> `#tag`.
pub fn channel_name(tag: &str) -> String {
    format!("{CHANNEL_PREFIX}{tag}")
}

/// `#tag` -> `tag`; `None` for names that are not channels.
pub fn tag_of(channel: &str) -> Option<&str> {
    channel.strip_prefix(CHANNEL_PREFIX)
}

/// Diff two roster snapshots from the point of view of a client that has
/// joined `joined`.
///
/// Directives come out in channel order: parts for joined channels that
/// vanished, then per surviving joined channel its leaves followed by its
/// joins (a channel missing from `old` counts as empty), and finally the
/// list of brand-new channels. Each uid appears at most once per channel.
pub fn reconcile(old: &Roster, new: &Roster, joined: &BTreeSet<String>) -> Vec<Directive> {
    let empty = BTreeSet::new();
    let mut directives = Vec::new();

    for channel in joined {
        if old.contains_key(channel) && !new.contains_key(channel) {
            directives.push(Directive::PartChannel(channel.clone()));
        }
    }

    for channel in joined {
        let Some(now) = new.get(channel) else {
            continue;
        };
        let before = old.get(channel).unwrap_or(&empty);
        directives.extend(before.difference(now).map(|&uid| Directive::UserLeft {
            channel: channel.clone(),
            uid,
        }));
        directives.extend(now.difference(before).map(|&uid| Directive::UserJoined {
            channel: channel.clone(),
            uid,
        }));
    }

    let fresh: Vec<String> = new
        .keys()
        .filter(|name| !old.contains_key(*name))
        .cloned()
        .collect();
    if !fresh.is_empty() {
        directives.push(Directive::NewChannelsAvailable(fresh));
    }

    directives
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster(entries: &[(&str, &[u64])]) -> Roster {
        entries
            .iter()
            .map(|(name, uids)| (name.to_string(), uids.iter().copied().collect()))
            .collect()
    }

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    /// Replay directives over `old` as seen by the client.
    fn apply(old: &Roster, joined: &BTreeSet<String>, directives: &[Directive]) -> Roster {
        let mut view: Roster = old
            .iter()
            .filter(|(name, _)| joined.contains(*name))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for directive in directives {
            match directive {
                Directive::PartChannel(channel) => {
                    view.remove(channel);
                }
                Directive::UserJoined { channel, uid } => {
                    view.entry(channel.clone()).or_default().insert(*uid);
                }
                Directive::UserLeft { channel, uid } => {
                    if let Some(members) = view.get_mut(channel) {
                        members.remove(uid);
                    }
                }
                Directive::NewChannelsAvailable(_) => {}
            }
        }
        view.retain(|_, members| !members.is_empty());
        view
    }

    fn restricted(new: &Roster, joined: &BTreeSet<String>) -> Roster {
        new.iter()
            .filter(|(name, members)| joined.contains(*name) && !members.is_empty())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    #[test]
    fn member_swap_in_joined_channel() {
        let old = roster(&[("#general", &[1, 2])]);
        let new = roster(&[("#general", &[2, 3])]);
        let directives = reconcile(&old, &new, &names(&["#general"]));
        assert_eq!(directives.len(), 2);
        assert!(directives.contains(&Directive::UserLeft {
            channel: "#general".into(),
            uid: 1
        }));
        assert!(directives.contains(&Directive::UserJoined {
            channel: "#general".into(),
            uid: 3
        }));
    }

    #[test]
    fn unjoined_channels_are_silent() {
        let old = roster(&[("#general", &[1]), ("#offtopic", &[1])]);
        let new = roster(&[("#general", &[1, 2])]);
        assert_eq!(reconcile(&old, &new, &BTreeSet::new()), vec![]);
    }

    #[test]
    fn vanished_joined_channel_is_parted() {
        let old = roster(&[("#general", &[1]), ("#room", &[1, 2])]);
        let new = roster(&[("#general", &[1])]);
        let directives = reconcile(&old, &new, &names(&["#general", "#room"]));
        assert_eq!(directives, vec![Directive::PartChannel("#room".into())]);
    }

    #[test]
    fn new_channels_are_announced_not_joined() {
        let old = roster(&[("#general", &[1])]);
        let new = roster(&[("#general", &[1]), ("#art", &[4]), ("#games", &[])]);
        let directives = reconcile(&old, &new, &names(&["#general"]));
        assert_eq!(
            directives,
            vec![Directive::NewChannelsAvailable(vec!["#art".into(), "#games".into()])]
        );
    }

    #[test]
    fn first_snapshot_announces_everything() {
        let new = roster(&[("#general", &[1, 2]), ("#offtopic", &[1, 2])]);
        let directives = reconcile(&Roster::new(), &new, &BTreeSet::new());
        assert_eq!(
            directives,
            vec![Directive::NewChannelsAvailable(vec![
                "#general".into(),
                "#offtopic".into()
            ])]
        );
    }

    #[test]
    fn missing_old_channel_counts_as_empty() {
        let new = roster(&[("#general", &[5])]);
        let directives = reconcile(&Roster::new(), &new, &names(&["#general"]));
        assert_eq!(
            directives,
            vec![
                Directive::UserJoined {
                    channel: "#general".into(),
                    uid: 5
                },
                Directive::NewChannelsAvailable(vec!["#general".into()]),
            ]
        );
    }

    #[test]
    fn replaying_directives_converges() {
        // Deterministic pseudo-random snapshots over a small universe.
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };
        let channels = ["#a", "#b", "#c", "#d"];
        let random_roster = |next: &mut dyn FnMut() -> u64| -> Roster {
            let mut r = Roster::new();
            for name in channels {
                if next() % 4 != 0 {
                    let members = (0..6u64).filter(|_| next() % 2 == 0).collect();
                    r.insert(name.to_string(), members);
                }
            }
            r
        };

        for _ in 0..200 {
            let old = random_roster(&mut next);
            let new = random_roster(&mut next);
            let joined: BTreeSet<String> = channels
                .iter()
                .filter(|_| next() % 2 == 0)
                .map(|s| s.to_string())
                .collect();

            let directives = reconcile(&old, &new, &joined);
            assert_eq!(
                apply(&old, &joined, &directives),
                restricted(&new, &joined),
                "old={old:?} new={new:?} joined={joined:?}"
            );

            // No uid both joins and leaves the same channel in one pass.
            for d in &directives {
                if let Directive::UserJoined { channel, uid } = d {
                    assert!(!directives.contains(&Directive::UserLeft {
                        channel: channel.clone(),
                        uid: *uid
                    }));
                    assert_eq!(directives.iter().filter(|x| *x == d).count(), 1);
                }
            }
        }
    }

    #[test]
    fn merge_tags_and_rooms() {
        let online: BTreeSet<u64> = [1, 2].into();
        let mut rooms = BTreeMap::new();
        rooms.insert("secret".to_string(), BTreeSet::from([2]));
        rooms.insert("offtopic".to_string(), BTreeSet::from([1]));
        let merged = merge(&["general".into(), "offtopic".into()], &online, &rooms);
        assert_eq!(
            merged,
            roster(&[("#general", &[1, 2]), ("#offtopic", &[1]), ("#secret", &[2])])
        );
    }

    #[test]
    fn channel_tag_mapping() {
        assert_eq!(channel_name("general"), "#general");
        assert_eq!(tag_of("#general"), Some("general"));
        assert_eq!(tag_of("bob"), None);
    }
}
