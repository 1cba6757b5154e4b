//! Module registry: which EasyDB records make up each harvestable module.
//!
//! A module name selects the remote object type, the search filters sent
//! with every listing request, and the destination subdirectory
//! (`<base>/<module>/`). The pool and tag ids are properties of the
//! collections instance and change only when the catalogue is reorganised.

use crate::error::IngestError;
use serde_json::{json, Value};

/// Tag marking records approved for publication.
const APPROVED_TAG: u32 = 207;

/// Static description of one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Module {
    /// Public name, also the subdirectory name.
    pub name: &'static str,
    /// EasyDB object type, e.g. `do_grpm_06`.
    pub objecttype: &'static str,
    tags: Option<&'static [u32]>,
    sample_tags: Option<&'static [u32]>,
    pool_ids: Option<&'static [u32]>,
    sample_pool_ids: Option<&'static [u32]>,
}

const MODULES: &[Module] = &[
    Module {
        name: "person",
        objecttype: "act_grpm_0103",
        tags: Some(&[88]),
        sample_tags: Some(&[88]),
        pool_ids: Some(&[85, 108]),
        sample_pool_ids: Some(&[124]),
    },
    Module {
        name: "group",
        objecttype: "act_grpm_0103",
        tags: Some(&[89, 90]),
        sample_tags: Some(&[89, 90]),
        pool_ids: Some(&[85, 108]),
        sample_pool_ids: Some(&[124]),
    },
    Module {
        name: "architectural_competition",
        objecttype: "ac",
        tags: None,
        sample_tags: Some(&[210]),
        pool_ids: None,
        sample_pool_ids: None,
    },
    Module {
        name: "archival_object",
        objecttype: "au_grpm_16",
        tags: Some(&[APPROVED_TAG]),
        sample_tags: Some(&[APPROVED_TAG]),
        pool_ids: Some(&[17, 127]),
        sample_pool_ids: Some(&[122]),
    },
    Module {
        name: "bibliographic_item",
        objecttype: "bi_grpm_08",
        tags: None,
        sample_tags: None,
        pool_ids: Some(&[92]),
        sample_pool_ids: Some(&[119]),
    },
    Module {
        name: "digital_object",
        objecttype: "do_grpm_06",
        tags: None,
        sample_tags: None,
        pool_ids: Some(&[26, 59]),
        sample_pool_ids: Some(&[125]),
    },
    Module {
        name: "oeuvre",
        objecttype: "oeu",
        tags: Some(&[91]),
        sample_tags: Some(&[91]),
        pool_ids: Some(&[92]),
        sample_pool_ids: Some(&[119]),
    },
    Module {
        name: "built_work",
        objecttype: "oeu",
        tags: Some(&[92]),
        sample_tags: Some(&[92]),
        pool_ids: Some(&[92]),
        sample_pool_ids: Some(&[119]),
    },
    Module {
        name: "project",
        objecttype: "oeu",
        tags: Some(&[93]),
        sample_tags: Some(&[93]),
        pool_ids: Some(&[92]),
        sample_pool_ids: Some(&[119]),
    },
    Module {
        name: "place",
        objecttype: "pl_grpm_05",
        tags: None,
        sample_tags: None,
        pool_ids: None,
        sample_pool_ids: Some(&[128]),
    },
];

impl Module {
    /// Look up a module by name.
    pub fn lookup(name: &str) -> Result<Module, IngestError> {
        MODULES
            .iter()
            .find(|m| m.name == name)
            .copied()
            .ok_or_else(|| IngestError::UnknownModule {
                name: name.to_string(),
                known: Self::names().join(", "),
            })
    }

    /// All registered module names, in registry order.
    pub fn names() -> Vec<&'static str> {
        MODULES.iter().map(|m| m.name).collect()
    }

    /// Search filters for the listing request.
    ///
    /// Sample harvests use the module's sample pools and tags.
    pub fn search_filters(&self, sample: bool) -> Vec<Value> {
        let mut filters = vec![json!({
            "type": "in",
            "bool": "must",
            "fields": ["_objecttype"],
            "in": [self.objecttype],
        })];

        let pools = if sample { self.sample_pool_ids } else { self.pool_ids };
        if let Some(pools) = pools {
            filters.push(json!({
                "type": "in",
                "bool": "should",
                "fields": [format!("{}._pool.pool._id", self.objecttype)],
                "in": pools,
            }));
        }

        let tags = if sample { self.sample_tags } else { self.tags };
        if let Some(tags) = tags {
            filters.push(json!({
                "type": "in",
                "bool": "must",
                "fields": ["_tags._id"],
                "in": tags,
            }));
        }

        filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_module() {
        let m = Module::lookup("digital_object").unwrap();
        assert_eq!(m.objecttype, "do_grpm_06");
    }

    #[test]
    fn lookup_unknown_module_lists_known_names() {
        let err = Module::lookup("furniture").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("furniture"));
        assert!(msg.contains("digital_object"));
    }

    #[test]
    fn filters_include_pools_and_tags() {
        let m = Module::lookup("person").unwrap();
        let filters = m.search_filters(false);
        assert_eq!(filters.len(), 3);
        assert_eq!(filters[1]["in"], json!([85, 108]));
        assert_eq!(filters[1]["fields"][0], "act_grpm_0103._pool.pool._id");
        assert_eq!(filters[2]["in"], json!([88]));
    }

    #[test]
    fn sample_filters_switch_pools() {
        let m = Module::lookup("digital_object").unwrap();
        let filters = m.search_filters(true);
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[1]["in"], json!([125]));
    }

    #[test]
    fn competition_has_tags_only_in_sample_mode() {
        let m = Module::lookup("architectural_competition").unwrap();
        assert_eq!(m.search_filters(false).len(), 1);
        assert_eq!(m.search_filters(true).len(), 2);
    }
}
