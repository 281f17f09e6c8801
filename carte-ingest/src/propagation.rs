//! Donor propagation across sibling locations
//!
//! Chains register each outlet as its own brand ("Subway @ Mall A", "Subway
//! @ Mall B"), and usually only one outlet yields a scrapable menu. After a
//! full pass, brands are grouped by core name and every group member with no
//! accepted record receives a copy of the best accepted sibling menu, marked
//! `donor_copied` with a back-reference to the donor.
//!
//! Grouping is a heuristic recomputed each run, never stored. It only ever
//! fills gaps: a brand holding any accepted record of its own is untouchable
//! here, and suspicious groups are flagged for review instead of propagated.

use std::collections::{BTreeMap, HashMap};

use sqlx::SqlitePool;
use uuid::Uuid;

use carte_common::config::PropagationConfig;
use carte_common::model::{BrandTarget, Provenance, QualityStatus};
use carte_common::Result;

use crate::matcher::slugify;
use crate::quality::QualityGate;
use crate::store::menus;

/// Trailing slug tokens that locate an outlet rather than name a brand.
/// Mall and district proper nouns cannot be enumerated; operators grow the
/// list per deployment through `propagation.extra_suffixes`.
const BUILTIN_SUFFIXES: &[&str] = &[
    "mall",
    "plaza",
    "point",
    "centre",
    "center",
    "city",
    "square",
    "hub",
    "park",
    "garden",
    "gardens",
    "airport",
    "terminal",
    "station",
    "interchange",
    "junction",
    "gateway",
    "outlet",
    "branch",
    "express",
    "kiosk",
    "level",
    "basement",
    "tower",
    "towers",
    "wing",
    "annex",
];

#[derive(Debug, Default)]
pub struct PropagationOutcome {
    pub copies: u32,
    pub oversized_groups: u32,
}

/// Reduce a display name to the chain's core name, or None when nothing
/// distinctive enough remains.
pub fn core_name(
    display_name: &str,
    extra_suffixes: &[String],
    min_core_len: usize,
) -> Option<String> {
    // Everything after an '@' is the outlet location by convention.
    let head = display_name.split('@').next().unwrap_or(display_name);
    let slug = slugify(head);
    if slug.is_empty() {
        return None;
    }

    let mut tokens: Vec<&str> = slug.split('-').collect();
    while tokens.len() > 1 {
        let last = tokens[tokens.len() - 1];
        let strip = last.len() <= 2
            || last.chars().all(|c| c.is_ascii_digit())
            || BUILTIN_SUFFIXES.contains(&last)
            || extra_suffixes.iter().any(|s| s == last);
        if !strip {
            break;
        }
        tokens.pop();
    }

    let core = tokens.join("-");
    if core.len() >= min_core_len {
        Some(core)
    } else {
        None
    }
}

/// Group brands by core name; only groups with at least two members can
/// ever have a donor and a target.
fn build_groups<'a>(
    brands: &'a [BrandTarget],
    config: &PropagationConfig,
) -> BTreeMap<String, Vec<&'a BrandTarget>> {
    let mut groups: BTreeMap<String, Vec<&BrandTarget>> = BTreeMap::new();
    for brand in brands {
        if let Some(core) =
            core_name(&brand.canonical_name, &config.extra_suffixes, config.min_core_len)
        {
            groups.entry(core).or_default().push(brand);
        }
    }
    groups.retain(|_, members| members.len() >= 2);
    groups
}

/// Pick the donor (highest accepted item count, earliest member on ties)
/// and the targets (members with no accepted record at all).
fn plan_group<'a>(
    members: &[&'a BrandTarget],
    accepted_counts: &HashMap<Uuid, u32>,
) -> Option<(&'a BrandTarget, Vec<&'a BrandTarget>)> {
    let mut donor: Option<(&BrandTarget, u32)> = None;
    for member in members {
        if let Some(count) = accepted_counts.get(&member.brand_id) {
            let better = match donor {
                None => true,
                Some((_, best)) => *count > best,
            };
            if better {
                donor = Some((member, *count));
            }
        }
    }
    let (donor, _) = donor?;

    let targets: Vec<&BrandTarget> = members
        .iter()
        .filter(|m| !accepted_counts.contains_key(&m.brand_id))
        .copied()
        .collect();
    if targets.is_empty() {
        None
    } else {
        Some((donor, targets))
    }
}

pub struct Propagator<'a> {
    config: &'a PropagationConfig,
}

impl<'a> Propagator<'a> {
    pub fn new(config: &'a PropagationConfig) -> Self {
        Self { config }
    }

    /// Run propagation over the full brand set. Must only be called after
    /// the acquisition pass has settled every scheduled pair.
    pub async fn run(
        &self,
        pool: &SqlitePool,
        gate: &QualityGate,
        brands: &[BrandTarget],
        dry_run: bool,
    ) -> Result<PropagationOutcome> {
        let mut outcome = PropagationOutcome::default();
        if !self.config.enabled {
            tracing::debug!("donor propagation disabled");
            return Ok(outcome);
        }

        let accepted_counts = menus::accepted_item_counts(pool).await?;
        let groups = build_groups(brands, self.config);
        tracing::debug!(groups = groups.len(), "built core-name groups");

        for (core, members) in &groups {
            if members.len() > self.config.max_group_size {
                tracing::warn!(
                    core_name = %core,
                    members = members.len(),
                    max = self.config.max_group_size,
                    "group too large to propagate safely; flagging for review"
                );
                outcome.oversized_groups += 1;
                continue;
            }
            let Some((donor, targets)) = plan_group(members, &accepted_counts) else {
                continue;
            };
            let Some(donor_record) = menus::best_accepted_record(pool, donor.brand_id).await?
            else {
                tracing::warn!(
                    core_name = %core,
                    donor = %donor.slug,
                    "donor has an accepted count but no loadable record"
                );
                continue;
            };

            for target in targets {
                // A quarantined record in the slot means an operator decision
                // is pending; leave it alone.
                if menus::has_record(pool, target.brand_id, donor_record.source).await? {
                    tracing::debug!(
                        target = %target.slug,
                        source = %donor_record.source,
                        "target already holds a record for the donor source"
                    );
                    continue;
                }

                let mut copy = donor_record.clone();
                copy.brand_id = target.brand_id;
                copy.provenance = Provenance::DonorCopied;
                copy.donor_brand_id = Some(donor.brand_id);
                copy.updated_at = chrono::Utc::now();
                let (quality, gate_reason) = gate.classify_record(&copy);
                copy.quality = quality;
                copy.gate_reason = gate_reason;
                if copy.quality != QualityStatus::Accepted {
                    // a donor that no longer gates as accepted must not spread
                    tracing::warn!(
                        donor = %donor.slug,
                        target = %target.slug,
                        "donor record fails the quality gate; not copying"
                    );
                    continue;
                }

                if dry_run {
                    tracing::info!(
                        core_name = %core,
                        donor = %donor.slug,
                        target = %target.slug,
                        items = copy.item_count,
                        "dry run: would copy donor menu"
                    );
                } else {
                    menus::upsert(pool, &copy).await?;
                    tracing::info!(
                        core_name = %core,
                        donor = %donor.slug,
                        target = %target.slug,
                        items = copy.item_count,
                        "copied donor menu"
                    );
                }
                outcome.copies += 1;
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brand(name: &str) -> BrandTarget {
        BrandTarget {
            brand_id: Uuid::new_v4(),
            canonical_name: name.to_string(),
            slug: slugify(name),
            known_urls: Vec::new(),
            locale_hint: "en-SG".to_string(),
            accepted: false,
            accepted_item_count: 0,
        }
    }

    #[test]
    fn core_name_strips_location_tails() {
        assert_eq!(core_name("Subway @ Mall A", &[], 4).as_deref(), Some("subway"));
        assert_eq!(
            core_name("Ajisen Ramen (Jem)", &[], 4).as_deref(),
            Some("ajisen-ramen")
        );
        assert_eq!(
            core_name("Food Republic Level 3", &[], 4).as_deref(),
            Some("food-republic")
        );
        assert_eq!(
            core_name("Toast Box Gardens", &[], 4).as_deref(),
            Some("toast-box")
        );
    }

    #[test]
    fn extra_suffixes_extend_the_strip_list() {
        assert_eq!(
            core_name("Ya Kun Kaya Toast Vivocity", &[], 4).as_deref(),
            Some("ya-kun-kaya-toast-vivocity")
        );
        let extras = vec!["vivocity".to_string()];
        assert_eq!(
            core_name("Ya Kun Kaya Toast Vivocity", &extras, 4).as_deref(),
            Some("ya-kun-kaya-toast")
        );
    }

    #[test]
    fn short_or_generic_cores_are_refused() {
        assert_eq!(core_name("KFC", &[], 4), None);
        assert_eq!(core_name("KFC @ Jem", &[], 4), None);
        assert_eq!(core_name("", &[], 4), None);
        assert_eq!(core_name("# @ !", &[], 4), None);
        // lowering the bar is an explicit operator decision
        assert_eq!(core_name("KFC", &[], 3).as_deref(), Some("kfc"));
    }

    #[test]
    fn never_strips_down_to_nothing() {
        // every token is strippable, but the head token must survive
        assert_eq!(core_name("Plaza Mall 2", &[], 4).as_deref(), Some("plaza"));
    }

    #[test]
    fn groups_need_two_members_sharing_a_core() {
        let brands = vec![
            brand("Subway @ Mall A"),
            brand("Subway @ Mall B"),
            brand("Ajisen Ramen"),
        ];
        let config = PropagationConfig::default();
        let groups = build_groups(&brands, &config);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups["subway"].len(), 2);
    }

    #[test]
    fn donor_is_biggest_accepted_member_and_targets_lack_acceptance() {
        let a = brand("Subway @ Mall A");
        let b = brand("Subway @ Mall B");
        let c = brand("Subway @ Mall C");
        let members = vec![&a, &b, &c];

        let mut accepted = HashMap::new();
        accepted.insert(a.brand_id, 40u32);
        accepted.insert(b.brand_id, 12u32);

        let (donor, targets) = plan_group(&members, &accepted).unwrap();
        assert_eq!(donor.brand_id, a.brand_id);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].brand_id, c.brand_id);
    }

    #[test]
    fn group_without_donor_or_without_target_plans_nothing() {
        let a = brand("Subway @ Mall A");
        let b = brand("Subway @ Mall B");
        let members = vec![&a, &b];

        // nobody accepted
        assert!(plan_group(&members, &HashMap::new()).is_none());

        // everybody accepted
        let mut accepted = HashMap::new();
        accepted.insert(a.brand_id, 40u32);
        accepted.insert(b.brand_id, 35u32);
        assert!(plan_group(&members, &accepted).is_none());
    }
}
