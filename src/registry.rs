use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, ZafferanoResult};
use crate::grammars::{CollectionId, Rule, RuleId};

/// An ordered list of rules, named when it comes from the repository
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize, Default)]
pub struct Collection {
    pub name: Option<String>,
    pub rules: Vec<RuleId>,
}

/// Holds every rule of a grammar and the collections grouping them.
///
/// Includes are stored as collection ids and only expanded when the tokenizer asks for the
/// rules active in a given context, so a collection including itself is fine.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    rules: Vec<Rule>,
    collections: Vec<Collection>,
    // repository name -> collection
    collection_by_name: HashMap<String, CollectionId>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            // the root collection is always the first one
            collections: vec![Collection::default()],
            collection_by_name: HashMap::new(),
        }
    }
}

impl Registry {
    /// The collection made of the grammar top-level `patterns`
    #[inline]
    pub fn root(&self) -> CollectionId {
        CollectionId(0)
    }

    #[inline]
    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id.as_index()]
    }

    pub fn get_rule(&self, id: RuleId) -> Option<&Rule> {
        self.rules.get(id.as_index())
    }

    #[inline]
    pub fn collection(&self, id: CollectionId) -> &[RuleId] {
        &self.collections[id.as_index()].rules
    }

    pub fn collection_id(&self, name: &str) -> Option<CollectionId> {
        self.collection_by_name.get(name).copied()
    }

    /// Rules of a repository collection as declared, includes are not expanded
    pub fn resolve(&self, name: &str) -> ZafferanoResult<&[RuleId]> {
        self.collection_id(name)
            .map(|id| self.collection(id))
            .ok_or_else(|| Error::UnresolvedCollection(name.to_owned()))
    }

    /// Expands includes into the list of rules that can actually match, keeping declaration
    /// order.
    ///
    /// This walks one include at a time with an explicit stack: a collection already
    /// visited is skipped so self or mutual recursion ends after one pass.
    pub fn flatten(&self, id: CollectionId) -> Vec<RuleId> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(id);
        // (collection, next rule index in it)
        let mut pending = vec![(id, 0usize)];

        while let Some((collection, index)) = pending.pop() {
            let Some(&rule_id) = self.collection(collection).get(index) else {
                continue;
            };
            pending.push((collection, index + 1));

            match self.rule(rule_id) {
                Rule::Include(include) => {
                    if visited.insert(include.target) {
                        pending.push((include.target, 0));
                    }
                }
                Rule::Match(_) | Rule::BeginEnd(_) => out.push(rule_id),
            }
        }

        out
    }

    pub(crate) fn reserve_collection(
        &mut self,
        name: Option<String>,
    ) -> ZafferanoResult<CollectionId> {
        let id = CollectionId(checked_id(self.collections.len(), "collections")?);
        if let Some(name) = &name {
            self.collection_by_name.insert(name.clone(), id);
        }
        self.collections.push(Collection {
            name,
            rules: Vec::new(),
        });
        Ok(id)
    }

    pub(crate) fn set_collection_rules(&mut self, id: CollectionId, rules: Vec<RuleId>) {
        self.collections[id.as_index()].rules = rules;
    }

    pub(crate) fn push_rule(
        &mut self,
        make: impl FnOnce(RuleId) -> Rule,
    ) -> ZafferanoResult<RuleId> {
        let id = RuleId(checked_id(self.rules.len(), "rules")?);
        self.rules.push(make(id));
        Ok(id)
    }

    #[cfg(feature = "debug")]
    pub(crate) fn rules_len(&self) -> usize {
        self.rules.len()
    }

    #[cfg(feature = "debug")]
    pub(crate) fn collections_len(&self) -> usize {
        self.collections.len()
    }
}

/// Ids are `u16`, a grammar with more items than that is rejected instead of wrapping
pub(crate) fn checked_id(len: usize, what: &str) -> ZafferanoResult<u16> {
    u16::try_from(len).map_err(|_| Error::InvalidRule {
        rule: "grammar".to_owned(),
        reason: format!("more than {} {what}", u16::MAX as usize + 1),
    })
}
