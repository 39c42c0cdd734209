//! Planning how a cluster of duplicate locations is folded into one.

use super::cluster::find_clusters;
use super::grouping::group_by_external_id;
use crate::availability::Meta;
use crate::config::DedupConfig;
use crate::error::{Error, Result};
use crate::location::{ExternalId, Location, Position, unpad_value};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use uuid::Uuid;

/// Field values to write onto a merge target. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LocationUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_lines: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub county: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
}

/// For each listed field that is null on the target and not yet filled by an
/// earlier donor, take the donor's value.
macro_rules! fill_missing {
    ($update:expr, $target:expr, $donor:expr, $($field:ident),+ $(,)?) => {
        $(
            if $target.$field.is_none() && $update.$field.is_none() {
                $update.$field.clone_from(&$donor.$field);
            }
        )+
    };
}

macro_rules! set_fields {
    ($update:expr, $($field:ident),+ $(,)?) => {{
        let mut fields = Vec::new();
        $(
            if $update.$field.is_some() {
                fields.push(stringify!($field));
            }
        )+
        fields
    }};
}

impl LocationUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Names of the fields this update writes.
    pub fn fields(&self) -> Vec<&'static str> {
        set_fields!(
            self,
            location_type,
            name,
            address_lines,
            city,
            state,
            postal_code,
            county,
            position,
            info_phone,
            info_url,
            booking_phone,
            booking_url,
            description,
            meta,
            is_public,
        )
    }

    fn fill_from(&mut self, target: &Location, donor: &Location) {
        fill_missing!(
            self,
            target,
            donor,
            location_type,
            name,
            address_lines,
            city,
            state,
            postal_code,
            county,
            position,
            info_phone,
            info_url,
            booking_phone,
            booking_url,
            description,
        );
    }
}

/// How to fold one cluster of duplicates into its target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergePlan {
    /// Surviving location: the earliest created member.
    pub target: Uuid,
    /// Locations absorbed into the target and then deleted.
    pub donors: Vec<Uuid>,
    /// Complete external id set the target ends up with.
    pub external_ids: Vec<ExternalId>,
    /// The part of `external_ids` the target does not hold yet.
    pub added_external_ids: Vec<ExternalId>,
    /// Member ids left out of `external_ids`: unpadded repeats and the
    /// losing side of known ambiguous pairs.
    pub removed_external_ids: Vec<ExternalId>,
    pub update: LocationUpdate,
    /// Human-readable diagnostics.
    pub notes: Vec<String>,
}

impl fmt::Display for MergePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "merge {} location(s) into {}",
            self.donors.len() + 1,
            self.target
        )?;
        for donor in &self.donors {
            writeln!(f, "  absorb: {donor}")?;
        }
        for id in &self.added_external_ids {
            writeln!(f, "  add external id: {id}")?;
        }
        for id in &self.removed_external_ids {
            writeln!(f, "  remove external id: {id}")?;
        }
        if !self.update.is_empty() {
            let update = serde_json::to_string(&self.update).map_err(|_| fmt::Error)?;
            writeln!(f, "  update: {update}")?;
        }
        for note in &self.notes {
            writeln!(f, "  note: {note}")?;
        }
        Ok(())
    }
}

/// A cluster whose plan could not be built.
#[derive(Debug)]
pub struct ClusterConflict {
    pub location_ids: Vec<Uuid>,
    pub error: Error,
}

/// Result of planning a whole working set.
#[derive(Debug, Default)]
pub struct PlanSet {
    pub plans: Vec<MergePlan>,
    pub conflicts: Vec<ClusterConflict>,
}

impl PlanSet {
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty() && self.conflicts.is_empty()
    }
}

/// Find every duplicate cluster in `locations` and plan its merge.
///
/// Locations must carry their external ids. A conflict in one cluster only
/// drops that cluster's plan.
pub fn plan_duplicate_merges(
    locations: &[Location],
    systems: Option<&[String]>,
    unpad: bool,
    config: &DedupConfig,
) -> PlanSet {
    let groups = group_by_external_id(locations, systems, unpad, config);
    let by_id: HashMap<Uuid, &Location> = locations.iter().map(|l| (l.id, l)).collect();

    let mut result = PlanSet::default();
    for cluster in find_clusters(&groups) {
        let members: Vec<&Location> = cluster.iter().filter_map(|id| by_id.get(id).copied()).collect();
        match plan_cluster_merge(&members, unpad, config) {
            Ok(plan) => result.plans.push(plan),
            Err(error) => {
                tracing::warn!(
                    locations = ?cluster,
                    error = %error,
                    "Skipping duplicate cluster that cannot be merged"
                );
                result.conflicts.push(ClusterConflict {
                    location_ids: cluster,
                    error,
                });
            }
        }
    }
    result
}

/// Plan folding `members` (two or more duplicates) into the earliest created.
pub fn plan_cluster_merge(
    members: &[&Location],
    unpad: bool,
    config: &DedupConfig,
) -> Result<MergePlan> {
    let mut ordered: Vec<&Location> = members.to_vec();
    ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    ordered.dedup_by_key(|l| l.id);

    let (target, donors) = match ordered.split_first() {
        Some((target, donors)) if !donors.is_empty() => (*target, donors),
        _ => {
            return Err(Error::value(
                "a merge cluster needs at least two distinct locations",
            ));
        }
    };

    let mut update = LocationUpdate::default();
    let mut notes = Vec::new();

    let mut donor_meta = Meta::new();
    let mut is_public = target.is_public;
    for donor in donors {
        update.fill_from(target, donor);

        // Earlier donors keep their keys over later ones.
        let mut next = donor.meta.clone();
        next.extend(donor_meta);
        donor_meta = next;

        is_public |= donor.is_public;
    }

    let mut meta = donor_meta;
    meta.extend(target.meta.clone());
    if meta != target.meta {
        update.meta = Some(meta);
    }
    if is_public != target.is_public {
        update.is_public = Some(is_public);
    }

    let mut candidates: Vec<ExternalId> = target.external_ids.clone();
    for donor in donors {
        candidates.extend(donor.external_ids.iter().cloned());
        candidates.push(ExternalId::new(
            config.provenance_system.clone(),
            donor.id.to_string(),
        ));
    }
    let (external_ids, removed_external_ids) =
        resolve_external_ids(candidates, unpad, config, &mut notes)?;

    let existing: BTreeSet<&ExternalId> = target.external_ids.iter().collect();
    let added_external_ids = external_ids
        .iter()
        .filter(|id| !existing.contains(id))
        .cloned()
        .collect();

    Ok(MergePlan {
        target: target.id,
        donors: donors.iter().map(|d| d.id).collect(),
        external_ids,
        added_external_ids,
        removed_external_ids,
        update,
        notes,
    })
}

/// De-duplicate a combined id list and check single-valued systems.
///
/// Returns the ids to keep and the ids dropped along the way.
fn resolve_external_ids(
    candidates: Vec<ExternalId>,
    unpad: bool,
    config: &DedupConfig,
    notes: &mut Vec<String>,
) -> Result<(Vec<ExternalId>, Vec<ExternalId>)> {
    let mut seen: BTreeMap<(String, String), String> = BTreeMap::new();
    let mut ids: Vec<ExternalId> = Vec::new();
    let mut dropped: Vec<ExternalId> = Vec::new();
    for id in candidates {
        let normalized = if unpad {
            unpad_value(&id.value)
        } else {
            id.value.clone()
        };
        match seen.get(&(id.system.clone(), normalized.clone())) {
            None => {
                seen.insert((id.system.clone(), normalized), id.value.clone());
                ids.push(id);
            }
            Some(kept) if *kept != id.value => {
                if !dropped.contains(&id) {
                    notes.push(format!("dropped {id} (same as {}:{kept})", id.system));
                    dropped.push(id);
                }
            }
            Some(_) => {}
        }
    }

    let mut by_system: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for id in &ids {
        if !config.is_multi_valued(&id.system) {
            by_system
                .entry(id.system.as_str())
                .or_default()
                .insert(id.value.as_str());
        }
    }

    for (system, values) in by_system {
        if values.len() < 2 {
            continue;
        }
        let mut values = values;
        for pair in config.ambiguous_pairs.iter().filter(|p| p.system == system) {
            if values.contains(pair.keep.as_str()) && values.remove(pair.drop.as_str()) {
                notes.push(format!(
                    "dropped {system}:{} in favor of {system}:{} (known ambiguous pair)",
                    pair.drop, pair.keep
                ));
                dropped.push(ExternalId::new(system, pair.drop.clone()));
            }
        }
        if values.len() > 1 {
            return Err(Error::MergeConflict {
                system: system.to_string(),
                values: values.into_iter().map(String::from).collect(),
            });
        }
    }

    ids.retain(|id| !dropped.contains(id));
    Ok((ids, dropped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AmbiguousPair;
    use serde_json::json;
    use time::Duration;
    use time::macros::datetime;

    fn location(n: u128, hours: i64, ids: &[(&str, &str)]) -> Location {
        let mut location = Location::new(
            Uuid::from_u128(n),
            "test",
            datetime!(2021-05-14 06:00:00 UTC) + Duration::hours(hours),
        );
        location.external_ids = ids.iter().map(|(s, v)| ExternalId::new(*s, *v)).collect();
        location
    }

    #[test]
    fn test_earliest_location_is_target() {
        let a = location(2, 0, &[("kroger", "123")]);
        let b = location(1, 5, &[("kroger", "123")]);
        let plans = plan_duplicate_merges(&[b.clone(), a.clone()], None, false, &DedupConfig::default());

        assert!(plans.conflicts.is_empty());
        assert_eq!(plans.plans.len(), 1);
        let plan = &plans.plans[0];
        assert_eq!(plan.target, a.id);
        assert_eq!(plan.donors, vec![b.id]);
        assert_eq!(
            plan.added_external_ids,
            vec![ExternalId::new("univaf_v1", b.id.to_string())]
        );
        assert_eq!(
            plan.external_ids,
            vec![
                ExternalId::new("kroger", "123"),
                ExternalId::new("univaf_v1", b.id.to_string()),
            ]
        );
    }

    #[test]
    fn test_created_at_tie_broken_by_id() {
        let a = location(7, 0, &[("kroger", "1")]);
        let b = location(3, 0, &[("kroger", "1")]);
        let plan = plan_cluster_merge(&[&a, &b], false, &DedupConfig::default()).unwrap();
        assert_eq!(plan.target, b.id);
        let again = plan_cluster_merge(&[&b, &a], false, &DedupConfig::default()).unwrap();
        assert_eq!(plan, again);
    }

    #[test]
    fn test_target_fields_never_overwritten() {
        let mut target = location(1, 0, &[("kroger", "1")]);
        target.name = Some("Kroger Pharmacy #1".to_string());
        let mut first = location(2, 1, &[("kroger", "1")]);
        first.name = Some("Kroger 1".to_string());
        first.city = Some("Columbus".to_string());
        let mut second = location(3, 2, &[("kroger", "1")]);
        second.city = Some("Cbus".to_string());
        second.postal_code = Some("43215".to_string());

        let plan =
            plan_cluster_merge(&[&second, &target, &first], false, &DedupConfig::default())
                .unwrap();
        assert_eq!(plan.update.name, None);
        assert_eq!(plan.update.city.as_deref(), Some("Columbus"));
        assert_eq!(plan.update.postal_code.as_deref(), Some("43215"));
        assert_eq!(plan.update.fields(), vec!["city", "postal_code"]);
    }

    #[test]
    fn test_meta_merge_precedence() {
        let mut target = location(1, 0, &[("kroger", "1")]);
        target.meta = json!({"a": "target"}).as_object().cloned().unwrap();
        let mut first = location(2, 1, &[("kroger", "1")]);
        first.meta = json!({"a": "first", "b": "first"}).as_object().cloned().unwrap();
        let mut second = location(3, 2, &[("kroger", "1")]);
        second.meta = json!({"b": "second", "c": "second"}).as_object().cloned().unwrap();

        let plan =
            plan_cluster_merge(&[&target, &first, &second], false, &DedupConfig::default())
                .unwrap();
        assert_eq!(
            serde_json::Value::Object(plan.update.meta.unwrap()),
            json!({"a": "target", "b": "first", "c": "second"})
        );
    }

    #[test]
    fn test_visibility_is_ored() {
        let mut target = location(1, 0, &[("kroger", "1")]);
        target.is_public = false;
        let donor = location(2, 1, &[("kroger", "1")]);
        let plan = plan_cluster_merge(&[&target, &donor], false, &DedupConfig::default()).unwrap();
        assert_eq!(plan.update.is_public, Some(true));
    }

    #[test]
    fn test_same_system_different_values_conflicts() {
        let a = location(1, 0, &[("kroger", "1"), ("cvs", "10")]);
        let b = location(2, 1, &[("kroger", "1"), ("cvs", "11")]);
        let c = location(3, 0, &[("walgreens", "5")]);
        let d = location(4, 1, &[("walgreens", "5")]);

        let plans = plan_duplicate_merges(&[a, b, c, d], None, false, &DedupConfig::default());
        assert_eq!(plans.plans.len(), 1);
        assert_eq!(plans.plans[0].target, Uuid::from_u128(3));
        assert_eq!(plans.conflicts.len(), 1);
        match &plans.conflicts[0].error {
            Error::MergeConflict { system, values } => {
                assert_eq!(system, "cvs");
                assert_eq!(values, &vec!["10".to_string(), "11".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_ambiguous_pair_resolved() {
        let a = location(1, 0, &[("kroger", "1"), ("cvs", "10")]);
        let b = location(2, 1, &[("kroger", "1"), ("cvs", "11")]);
        let config = DedupConfig {
            ambiguous_pairs: vec![AmbiguousPair {
                system: "cvs".to_string(),
                keep: "11".to_string(),
                drop: "10".to_string(),
            }],
            ..Default::default()
        };
        let plan = plan_cluster_merge(&[&a, &b], false, &config).unwrap();
        assert!(plan.external_ids.contains(&ExternalId::new("cvs", "11")));
        assert!(!plan.external_ids.contains(&ExternalId::new("cvs", "10")));
        assert_eq!(plan.removed_external_ids, vec![ExternalId::new("cvs", "10")]);
        assert_eq!(plan.notes.len(), 1);
    }

    #[test]
    fn test_multi_valued_systems_never_conflict() {
        let a = location(1, 0, &[("kroger", "1"), ("univaf_v0", "x")]);
        let b = location(2, 1, &[("kroger", "1"), ("univaf_v0", "y")]);
        let c = location(3, 2, &[("kroger", "1")]);
        let plan = plan_cluster_merge(&[&a, &b, &c], false, &DedupConfig::default()).unwrap();
        let provenance: Vec<_> = plan
            .external_ids
            .iter()
            .filter(|id| id.system == "univaf_v1")
            .collect();
        assert_eq!(provenance.len(), 2);
        assert!(plan.external_ids.contains(&ExternalId::new("univaf_v0", "y")));
    }

    #[test]
    fn test_unpadded_duplicates_collapse() {
        let a = location(1, 0, &[("rite_aid", "00123")]);
        let b = location(2, 1, &[("rite_aid", "123")]);
        let plans = plan_duplicate_merges(&[a, b], None, true, &DedupConfig::default());
        assert!(plans.conflicts.is_empty());
        let plan = &plans.plans[0];
        assert!(plan.external_ids.contains(&ExternalId::new("rite_aid", "00123")));
        assert!(!plan.external_ids.contains(&ExternalId::new("rite_aid", "123")));
        assert_eq!(plan.removed_external_ids, vec![ExternalId::new("rite_aid", "123")]);
    }

    #[test]
    fn test_single_location_cannot_be_planned() {
        let a = location(1, 0, &[]);
        assert!(matches!(
            plan_cluster_merge(&[&a, &a], false, &DedupConfig::default()),
            Err(Error::Value(_))
        ));
    }

    #[test]
    fn test_plan_display() {
        let a = location(1, 0, &[("kroger", "1")]);
        let mut b = location(2, 1, &[("kroger", "1")]);
        b.name = Some("Kroger".to_string());
        let plan = plan_cluster_merge(&[&a, &b], false, &DedupConfig::default()).unwrap();
        let text = plan.to_string();
        assert!(text.starts_with(&format!("merge 2 location(s) into {}", a.id)));
        assert!(text.contains(&format!("absorb: {}", b.id)));
        assert!(text.contains(r#"update: {"name":"Kroger"}"#));
    }
}
