use std::collections::{HashMap, HashSet};

/// A replace-word candidate before reconciliation.
#[derive(Debug, Clone)]
pub struct ReplaceProposal {
    pub source: String,
    pub target: String,
    pub confidence: f64,
    pub occurrence_count: i64,
    pub examples: Vec<String>,
}

/// A special-word candidate before reconciliation.
#[derive(Debug, Clone)]
pub struct SpecialProposal {
    pub word: String,
    pub word_type: String,
    pub confidence: f64,
    pub occurrence_count: i64,
    pub examples: Vec<String>,
}

/// A replace-word proposal that survived reconciliation, with a record of
/// any source/target rewrite applied along the way.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledReplace {
    pub source: String,
    pub target: String,
    pub transformation: Option<String>,
    pub confidence: f64,
    pub occurrence_count: i64,
    pub examples: Vec<String>,
}

/// A special-word proposal that survived reconciliation — either a direct
/// proposal or one auto-seeded from an accepted replace-word's target.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledSpecial {
    pub word: String,
    pub word_type: String,
    pub confidence: f64,
    pub occurrence_count: i64,
    pub examples: Vec<String>,
    pub auto_added: bool,
}

#[derive(Debug, Default)]
pub struct ReconciliationResult {
    pub replace: Vec<ReconciledReplace>,
    pub special: Vec<ReconciledSpecial>,
}

/// Reconcile newly proposed replace/special words against the active
/// dictionaries (spec §4.5.2). Rule order matters and must not be
/// reshuffled:
///
/// - R0: a proposal whose source equals its target is dropped outright.
/// - R1: a source that collides with a protected word (any existing
///   replace-target or special word) has its source/target swapped; if the
///   swapped pair already exists verbatim, it is dropped as a duplicate.
/// - R2: a source that already has a mapping in the active dictionary is
///   rewritten — `DB: A->B, proposal: A->C` becomes `C->B` — so the new
///   word is taught the existing canonical form instead of overriding it.
/// - R3: if the rewritten source already has its own mapping, the proposal
///   is dropped (it would conflict with R2's own rewrite).
/// - R4: whatever survives R0-R3 is accepted.
/// - R5: an accepted replace-word's target is auto-seeded as a special
///   word when it is not already one, so it is immediately visible to R1's
///   protected set. The auto-seed also updates the in-memory special-word
///   set used by the rest of this same call, preventing the batch's own
///   special-word proposals from re-adding it.
/// - R6: a special-word proposal is dropped if it already exists — checked
///   against the set as extended by R5 within the same call.
pub fn reconcile(
    replace_proposals: Vec<ReplaceProposal>,
    special_proposals: Vec<SpecialProposal>,
    existing_replace_mapping: &HashMap<String, String>,
    existing_special_words: &HashSet<String>,
) -> ReconciliationResult {
    let replace_sources: HashSet<&str> = existing_replace_mapping.keys().map(String::as_str).collect();
    let replace_targets: HashSet<&str> = existing_replace_mapping.values().map(String::as_str).collect();
    let protected: HashSet<String> = replace_targets
        .iter()
        .map(|s| s.to_string())
        .chain(existing_special_words.iter().cloned())
        .collect();

    let mut special_words_seen: HashSet<String> = existing_special_words.clone();
    let mut result = ReconciliationResult::default();

    for proposal in replace_proposals {
        let ReplaceProposal {
            mut source,
            mut target,
            confidence,
            occurrence_count,
            examples,
        } = proposal;

        if source == target {
            continue; // R0
        }

        let original_source = source.clone();
        let original_target = target.clone();
        let mut transformation = None;

        if protected.contains(&source) {
            // R1: the proposed source is already a confirmed/canonical word.
            std::mem::swap(&mut source, &mut target);
            transformation = Some(format!(
                "swapped (protected): {original_source} <-> {original_target}"
            ));

            if let Some(existing_target) = existing_replace_mapping.get(&source) {
                if existing_target == &target {
                    continue; // duplicate after swap
                }
            }
        }

        if let Some(db_target) = existing_replace_mapping.get(&source) {
            // R2: the (possibly swapped) source already has a mapping —
            // rewrite the proposal to chain onto the existing target.
            let new_source = target.clone();
            let new_target = db_target.clone();
            transformation = Some(format!(
                "transformed: {original_source}->{original_target} => {new_source}->{new_target}"
            ));
            source = new_source;
            target = new_target;

            if existing_replace_mapping.contains_key(&source) {
                continue; // R3: rewritten source already has its own mapping
            }
        }

        // R4
        if !special_words_seen.contains(&target) {
            // R5
            result.special.push(ReconciledSpecial {
                word: target.clone(),
                word_type: "auto_from_replace".to_string(),
                confidence: 1.0,
                occurrence_count: 0,
                examples: vec![format!("replace-word target: {source} -> {target}")],
                auto_added: true,
            });
            special_words_seen.insert(target.clone());
        }

        result.replace.push(ReconciledReplace {
            source,
            target,
            transformation,
            confidence,
            occurrence_count,
            examples,
        });
    }

    for proposal in special_proposals {
        if special_words_seen.contains(&proposal.word) {
            continue; // R6
        }
        result.special.push(ReconciledSpecial {
            word: proposal.word,
            word_type: proposal.word_type,
            confidence: proposal.confidence,
            occurrence_count: proposal.occurrence_count,
            examples: proposal.examples,
            auto_added: false,
        });
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replace(source: &str, target: &str) -> ReplaceProposal {
        ReplaceProposal {
            source: source.into(),
            target: target.into(),
            confidence: 0.8,
            occurrence_count: 5,
            examples: vec![],
        }
    }

    fn special(word: &str) -> SpecialProposal {
        SpecialProposal {
            word: word.into(),
            word_type: "slang".into(),
            confidence: 0.8,
            occurrence_count: 5,
            examples: vec![],
        }
    }

    #[test]
    fn r0_skips_self_mapping() {
        let out = reconcile(vec![replace("foo", "foo")], vec![], &HashMap::new(), &HashSet::new());
        assert!(out.replace.is_empty());
    }

    #[test]
    fn r1_swaps_protected_source() {
        let mapping = HashMap::new();
        let mut specials = HashSet::new();
        specials.insert("foo".to_string());
        // "foo" is protected (already a special word); proposal foo->bar swaps to bar->foo.
        let out = reconcile(vec![replace("foo", "bar")], vec![], &mapping, &specials);
        assert_eq!(out.replace.len(), 1);
        assert_eq!(out.replace[0].source, "bar");
        assert_eq!(out.replace[0].target, "foo");
        assert!(out.replace[0].transformation.is_some());
    }

    #[test]
    fn r1_drops_duplicate_after_swap() {
        let mut mapping = HashMap::new();
        mapping.insert("bar".to_string(), "foo".to_string());
        let mut specials = HashSet::new();
        specials.insert("foo".to_string());
        let out = reconcile(vec![replace("foo", "bar")], vec![], &mapping, &specials);
        assert!(out.replace.is_empty());
    }

    #[test]
    fn r2_chains_onto_existing_mapping() {
        let mut mapping = HashMap::new();
        mapping.insert("a".to_string(), "b".to_string());
        // Gemini proposes a->c; existing a->b means this should become c->b.
        let out = reconcile(vec![replace("a", "c")], vec![], &mapping, &HashSet::new());
        assert_eq!(out.replace.len(), 1);
        assert_eq!(out.replace[0].source, "c");
        assert_eq!(out.replace[0].target, "b");
    }

    #[test]
    fn r3_drops_when_transformed_source_already_mapped() {
        let mut mapping = HashMap::new();
        mapping.insert("a".to_string(), "b".to_string());
        mapping.insert("c".to_string(), "z".to_string());
        let out = reconcile(vec![replace("a", "c")], vec![], &mapping, &HashSet::new());
        assert!(out.replace.is_empty());
    }

    #[test]
    fn r5_auto_seeds_target_as_special() {
        let out = reconcile(vec![replace("foo", "bar")], vec![], &HashMap::new(), &HashSet::new());
        assert_eq!(out.replace.len(), 1);
        assert_eq!(out.special.len(), 1);
        assert_eq!(out.special[0].word, "bar");
        assert!(out.special[0].auto_added);
    }

    #[test]
    fn r6_skips_existing_special_word() {
        let mut specials = HashSet::new();
        specials.insert("wow".to_string());
        let out = reconcile(vec![], vec![special("wow")], &HashMap::new(), &specials);
        assert!(out.special.is_empty());
    }

    #[test]
    fn r6_skips_special_proposal_matching_autoseeded_target_same_batch() {
        // The replace proposal auto-seeds "bar" as special; a same-batch
        // special proposal for "bar" must be skipped even though it was not
        // in the pre-existing set.
        let out = reconcile(vec![replace("foo", "bar")], vec![special("bar")], &HashMap::new(), &HashSet::new());
        assert_eq!(out.special.len(), 1);
        assert!(out.special[0].auto_added);
    }
}
