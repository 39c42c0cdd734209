//! Grouping locations by shared external identifiers.

use crate::config::DedupConfig;
use crate::location::Location;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Map every `system:value` key to the set of locations holding it.
///
/// Systems listed in `config.excluded_systems` are ignored. When `systems` is
/// given, only those systems are considered. With `unpad`, numeric values are
/// compared without leading zeros so `0123` and `123` group together.
pub fn group_by_external_id(
    locations: &[Location],
    systems: Option<&[String]>,
    unpad: bool,
    config: &DedupConfig,
) -> BTreeMap<String, BTreeSet<Uuid>> {
    let mut groups: BTreeMap<String, BTreeSet<Uuid>> = BTreeMap::new();

    for location in locations {
        for external_id in &location.external_ids {
            if config.is_excluded(&external_id.system) {
                continue;
            }
            if let Some(systems) = systems
                && !systems.iter().any(|s| s == &external_id.system)
            {
                continue;
            }

            let key = if unpad {
                external_id.unpadded().key()
            } else {
                external_id.key()
            };
            groups.entry(key).or_default().insert(location.id);
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::ExternalId;
    use time::macros::datetime;

    fn location(n: u128, ids: &[(&str, &str)]) -> Location {
        let mut location = Location::new(
            Uuid::from_u128(n),
            "test",
            datetime!(2021-05-14 06:00:00 UTC),
        );
        location.external_ids = ids.iter().map(|(s, v)| ExternalId::new(*s, *v)).collect();
        location
    }

    #[test]
    fn test_groups_shared_ids() {
        let locations = vec![
            location(1, &[("kroger", "123"), ("vtrcks", "abc")]),
            location(2, &[("kroger", "123"), ("vtrcks", "abc")]),
            location(3, &[("walgreens", "9")]),
        ];
        let groups = group_by_external_id(&locations, None, false, &DedupConfig::default());

        assert_eq!(groups.len(), 2);
        assert_eq!(
            groups["kroger:123"],
            BTreeSet::from([Uuid::from_u128(1), Uuid::from_u128(2)])
        );
        assert!(!groups.contains_key("vtrcks:abc"));
    }

    #[test]
    fn test_restrict_to_systems() {
        let locations = vec![location(1, &[("kroger", "123"), ("walgreens", "9")])];
        let systems = vec!["walgreens".to_string()];
        let groups =
            group_by_external_id(&locations, Some(&systems), false, &DedupConfig::default());
        assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["walgreens:9"]);
    }

    #[test]
    fn test_unpad_joins_zero_padded_values() {
        let locations = vec![
            location(1, &[("rite_aid", "00123")]),
            location(2, &[("rite_aid", "123")]),
        ];
        let config = DedupConfig::default();

        let padded = group_by_external_id(&locations, None, false, &config);
        assert_eq!(padded.len(), 2);

        let unpadded = group_by_external_id(&locations, None, true, &config);
        assert_eq!(unpadded.len(), 1);
        assert_eq!(unpadded["rite_aid:123"].len(), 2);
    }
}
