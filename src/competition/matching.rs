//! Group selection for new competitions
//!
//! Given a batch of waiting memberships (oldest first), the matcher picks the
//! group that founds the next competition:
//! 1. players sharing a level, if any level has at least two players
//! 2. otherwise players sharing a country, with the same rule
//! 3. otherwise the whole batch
//!
//! When several partitions qualify, the one holding the longest-waiting player
//! wins. Members keep their batch order, so the founder of a group is always
//! its earliest joiner.

use crate::types::{MatchCriterion, Membership, PlayerId};
use std::collections::HashMap;
use std::hash::Hash;

/// Smallest group that can found a competition
pub const MIN_GROUP_SIZE: usize = 2;

/// A set of waiting memberships selected to found a competition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchGroup {
    pub criterion: MatchCriterion,
    pub members: Vec<Membership>,
}

impl MatchGroup {
    pub fn new(criterion: MatchCriterion, members: Vec<Membership>) -> Self {
        Self { criterion, members }
    }

    /// Member whose snapshot seeds the competition's level and country
    pub fn founder(&self) -> Option<&Membership> {
        self.members.first()
    }

    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.members.iter().map(|m| m.player_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Trait for grouping policies
pub trait Matchmaker: Send + Sync {
    /// Select a group from `waiting`, which is ordered by join time. Returns
    /// `None` when fewer than [`MIN_GROUP_SIZE`] players are waiting.
    fn select_group(&self, waiting: &[Membership]) -> Option<MatchGroup>;
}

/// Level first, then country, then everyone
#[derive(Debug, Default, Clone)]
pub struct LevelCountryMatcher;

impl LevelCountryMatcher {
    pub fn new() -> Self {
        Self
    }
}

impl Matchmaker for LevelCountryMatcher {
    fn select_group(&self, waiting: &[Membership]) -> Option<MatchGroup> {
        if waiting.len() < MIN_GROUP_SIZE {
            return None;
        }

        if let Some((level, members)) = first_qualifying_partition(waiting, |m| m.level) {
            return Some(MatchGroup {
                criterion: MatchCriterion::Level(level),
                members,
            });
        }

        if let Some((country, members)) =
            first_qualifying_partition(waiting, |m| m.country_code.clone())
        {
            return Some(MatchGroup {
                criterion: MatchCriterion::Country(country),
                members,
            });
        }

        Some(MatchGroup {
            criterion: MatchCriterion::Fallback,
            members: waiting.to_vec(),
        })
    }
}

/// Partition `waiting` by `key` and return the partition that qualifies
/// first when walking the batch in order.
fn first_qualifying_partition<K, F>(waiting: &[Membership], key: F) -> Option<(K, Vec<Membership>)>
where
    K: Eq + Hash + Clone,
    F: Fn(&Membership) -> K,
{
    let mut sizes: HashMap<K, usize> = HashMap::new();
    for membership in waiting {
        *sizes.entry(key(membership)).or_default() += 1;
    }

    let chosen = waiting
        .iter()
        .map(&key)
        .find(|k| sizes.get(k).copied().unwrap_or(0) >= MIN_GROUP_SIZE)?;

    let members = waiting
        .iter()
        .filter(|m| key(*m) == chosen)
        .cloned()
        .collect();

    Some((chosen, members))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MembershipStatus;
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;

    fn member(id: i64, level: i32, country: &str) -> Membership {
        let joined_at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap() + Duration::seconds(id);
        Membership {
            id,
            player_id: format!("player{}", id),
            competition_id: None,
            status: MembershipStatus::Waiting,
            score: 0,
            joined_at,
            updated_at: joined_at,
            level,
            country_code: country.to_string(),
        }
    }

    fn ids(group: &MatchGroup) -> Vec<i64> {
        group.members.iter().map(|m| m.id).collect()
    }

    #[test]
    fn test_too_few_players() {
        let matcher = LevelCountryMatcher::new();
        assert!(matcher.select_group(&[]).is_none());
        assert!(matcher.select_group(&[member(1, 1, "US")]).is_none());
    }

    #[test]
    fn test_level_match_leaves_others_waiting() {
        let matcher = LevelCountryMatcher::new();
        let waiting = vec![member(1, 5, "US"), member(2, 3, "TR"), member(3, 5, "DE")];

        let group = matcher.select_group(&waiting).unwrap();
        assert_eq!(group.criterion, MatchCriterion::Level(5));
        assert_eq!(ids(&group), vec![1, 3]);
        assert_eq!(group.founder().unwrap().player_id, "player1");
    }

    #[test]
    fn test_level_takes_precedence_over_country() {
        let matcher = LevelCountryMatcher::new();
        let waiting = vec![
            member(1, 1, "US"),
            member(2, 2, "US"),
            member(3, 7, "TR"),
            member(4, 7, "DE"),
        ];

        let group = matcher.select_group(&waiting).unwrap();
        assert_eq!(group.criterion, MatchCriterion::Level(7));
        assert_eq!(ids(&group), vec![3, 4]);
    }

    #[test]
    fn test_country_match_when_no_level_pairs() {
        let matcher = LevelCountryMatcher::new();
        let waiting = vec![member(1, 1, "US"), member(2, 2, "TR"), member(3, 3, "TR")];

        let group = matcher.select_group(&waiting).unwrap();
        assert_eq!(group.criterion, MatchCriterion::Country("TR".to_string()));
        assert_eq!(ids(&group), vec![2, 3]);
    }

    #[test]
    fn test_fallback_takes_whole_batch() {
        let matcher = LevelCountryMatcher::new();
        let waiting = vec![member(1, 1, "US"), member(2, 2, "TR"), member(3, 3, "DE")];

        let group = matcher.select_group(&waiting).unwrap();
        assert_eq!(group.criterion, MatchCriterion::Fallback);
        assert_eq!(ids(&group), vec![1, 2, 3]);
    }

    #[test]
    fn test_tie_break_prefers_longest_waiting_player() {
        let matcher = LevelCountryMatcher::new();
        // Levels 9 and 2 both qualify; player 1 (level 2) has waited longest.
        let waiting = vec![
            member(1, 2, "US"),
            member(2, 9, "US"),
            member(3, 9, "US"),
            member(4, 2, "US"),
        ];

        let group = matcher.select_group(&waiting).unwrap();
        assert_eq!(group.criterion, MatchCriterion::Level(2));
        assert_eq!(ids(&group), vec![1, 4]);
    }

    proptest! {
        #[test]
        fn prop_group_is_valid(specs in prop::collection::vec((0i32..4, 0usize..3), 0..12)) {
            let countries = ["US", "TR", "DE"];
            let waiting: Vec<Membership> = specs
                .iter()
                .enumerate()
                .map(|(i, (level, country))| member(i as i64, *level, countries[*country]))
                .collect();

            let matcher = LevelCountryMatcher::new();
            match matcher.select_group(&waiting) {
                None => prop_assert!(waiting.len() < MIN_GROUP_SIZE),
                Some(group) => {
                    prop_assert!(group.len() >= MIN_GROUP_SIZE);
                    // members keep batch order
                    let member_ids = ids(&group);
                    let mut sorted = member_ids.clone();
                    sorted.sort();
                    prop_assert_eq!(&member_ids, &sorted);

                    match &group.criterion {
                        MatchCriterion::Level(level) => {
                            prop_assert!(group.members.iter().all(|m| m.level == *level));
                            let all_with_level = waiting.iter().filter(|m| m.level == *level).count();
                            prop_assert_eq!(group.len(), all_with_level);
                        }
                        MatchCriterion::Country(country) => {
                            // no level had a pair
                            let mut levels: Vec<i32> = waiting.iter().map(|m| m.level).collect();
                            levels.sort();
                            levels.dedup();
                            prop_assert_eq!(levels.len(), waiting.len());
                            prop_assert!(group.members.iter().all(|m| &m.country_code == country));
                        }
                        MatchCriterion::Fallback => {
                            prop_assert_eq!(group.len(), waiting.len());
                        }
                    }
                }
            }
        }
    }
}
