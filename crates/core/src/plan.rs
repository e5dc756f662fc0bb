use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

use crate::{ApiRef, CheckMeta, EngineError};

/// Orders the collector calls needed by `checks`.
///
/// Each check lists its apis in the order they depend on each other
/// (a listing before the per-resource describe). Apis shared by several
/// checks appear once.
pub fn collection_order<'a>(checks: impl IntoIterator<Item = &'a CheckMeta>) -> Result<Vec<ApiRef>, EngineError> {
    let mut g: DiGraph<ApiRef, ()> = DiGraph::new();
    let mut api_to_ix: HashMap<ApiRef, NodeIndex> = HashMap::new();
    for check in checks {
        let mut prev: Option<NodeIndex> = None;
        for api in check.api_refs()? {
            let ix = *api_to_ix.entry(api.clone()).or_insert_with(|| g.add_node(api));
            if let Some(p) = prev {
                if p != ix {
                    g.update_edge(p, ix, ());
                }
            }
            prev = Some(ix);
        }
    }
    let ordered = toposort(&g, None).map_err(|_| EngineError::Cycle)?;
    Ok(ordered.into_iter().map(|ix| g[ix].clone()).collect())
}
