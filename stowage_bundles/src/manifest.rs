//====================================================================

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use bincode::{config, Decode, Encode};

use crate::{
    bundle::Bundle,
    error::BundleError,
    format::{decode_config, FormatError, MANIFEST_ENTRY},
    source::BundleSource,
    Hasher,
};

//====================================================================

#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
struct ManifestRecord {
    bundle: String,
    dependencies: Vec<String>,
}

//====================================================================

/// Direct dependencies between bundle names. Bundles missing from the
/// graph depend on nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    direct: HashMap<String, Vec<String>, Hasher>,
}

impl DependencyGraph {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bundle<I, S>(mut self, bundle: impl Into<String>, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(bundle, dependencies);
        self
    }

    pub fn insert<I, S>(&mut self, bundle: impl Into<String>, dependencies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.direct.insert(
            bundle.into(),
            dependencies.into_iter().map(Into::into).collect(),
        );
    }

    #[inline]
    pub fn direct(&self, bundle: &str) -> &[String] {
        self.direct.get(bundle).map(Vec::as_slice).unwrap_or(&[])
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.direct.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.direct.is_empty()
    }

    /// Every bundle that must be loaded before `bundle`, each one listed
    /// after its own dependencies. `bundle` itself is not included.
    pub fn dependencies(&self, bundle: &str) -> Result<Vec<String>, BundleError> {
        let mut stack = vec![bundle.to_string()];
        let mut done = HashSet::default();
        let mut order = Vec::new();

        self.visit(bundle, &mut stack, &mut done, &mut order)?;

        Ok(order)
    }

    fn visit(
        &self,
        bundle: &str,
        stack: &mut Vec<String>,
        done: &mut HashSet<String, Hasher>,
        order: &mut Vec<String>,
    ) -> Result<(), BundleError> {
        for dependency in self.direct(bundle) {
            if done.contains(dependency) {
                continue;
            }

            if let Some(start) = stack.iter().position(|name| name == dependency) {
                let mut cycle = stack[start..].to_vec();
                cycle.push(dependency.clone());
                return Err(BundleError::DependencyCycle(cycle));
            }

            stack.push(dependency.clone());
            self.visit(dependency, stack, done, order)?;
            stack.pop();

            done.insert(dependency.clone());
            order.push(dependency.clone());
        }

        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::error::EncodeError> {
        let mut records = self
            .direct
            .iter()
            .map(|(bundle, dependencies)| ManifestRecord {
                bundle: bundle.clone(),
                dependencies: dependencies.clone(),
            })
            .collect::<Vec<_>>();

        records.sort_by(|a, b| a.bundle.cmp(&b.bundle));

        bincode::encode_to_vec(&records, config::standard())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        let (records, _): (Vec<ManifestRecord>, usize) =
            bincode::decode_from_slice(bytes, decode_config())?;

        Ok(Self {
            direct: records
                .into_iter()
                .map(|record| (record.bundle, record.dependencies))
                .collect(),
        })
    }
}

//====================================================================

/// Lazily opens the root package and keeps its dependency graph for the
/// rest of the session.
#[derive(Debug)]
pub struct ManifestResolver {
    root: String,
    graph: Option<Arc<DependencyGraph>>,
}

impl ManifestResolver {
    #[inline]
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            graph: None,
        }
    }

    #[inline]
    pub fn root(&self) -> &str {
        &self.root
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.graph.is_some()
    }

    /// Loads the graph on first use. A failed attempt is not remembered.
    pub fn graph(&mut self, source: &dyn BundleSource) -> Result<Arc<DependencyGraph>, BundleError> {
        if let Some(graph) = &self.graph {
            return Ok(graph.clone());
        }

        let root = self.root.clone();
        let unavailable = |reason: String| BundleError::ManifestUnavailable {
            root: root.clone(),
            reason,
        };

        let bytes = source
            .read(&root)
            .map_err(|e| unavailable(e.to_string()))?;

        let package = Bundle::from_bytes(&root, &bytes).map_err(|e| unavailable(e.to_string()))?;

        let entry = package
            .entry(MANIFEST_ENTRY)
            .ok_or_else(|| unavailable(format!("missing '{}' entry", MANIFEST_ENTRY)))?;

        let graph = DependencyGraph::from_bytes(&entry.data)
            .map_err(|e| unavailable(format!("manifest: {}", e)))?;
        let graph = Arc::new(graph);

        log::debug!(
            "Loaded manifest from root package '{}' ({} bundles)",
            root,
            graph.len()
        );

        self.graph = Some(graph.clone());
        Ok(graph)
    }

    #[inline]
    pub fn dependencies(
        &mut self,
        source: &dyn BundleSource,
        bundle: &str,
    ) -> Result<Vec<String>, BundleError> {
        self.graph(source)?.dependencies(bundle)
    }

    #[inline]
    pub fn reset(&mut self) {
        self.graph = None;
    }
}

//====================================================================


//====================================================================
