//! Materialization plans and their cache.
//!
//! A plan decides, for one type and one set of available member names, which
//! constructor creates the instance and which members are assigned
//! afterwards. Choosing is reflection-like work over the metadata, so plans
//! are cached per (type, name set) and shared across executions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;

use docql_core::metadata::{Model, TypeDescriptor};

use crate::error::{DqlError, DqlResult};

/// How to build one instance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaterializationPlan {
    pub type_name: String,
    /// Chosen constructor, `None` for the implicit default
    pub constructor: Option<String>,
    /// (parameter, member) pairs passed to the constructor
    pub arguments: Vec<(String, String)>,
    /// Members assigned after construction
    pub setters: Vec<String>,
    /// Read-only members no constructor parameter accepts
    pub skipped: Vec<String>,
}

impl MaterializationPlan {
    /// Members whose values end up on the instance
    pub fn assigned(&self) -> impl Iterator<Item = &str> {
        self.arguments
            .iter()
            .map(|(_, member)| member.as_str())
            .chain(self.setters.iter().map(String::as_str))
    }

    /// Choose a constructor for `names` and route the rest to setters.
    ///
    /// Types unknown to the model (anonymous projections) take every member
    /// through setters.
    pub fn build(model: &Model, type_name: &str, names: &[String]) -> DqlResult<Self> {
        let Ok(descriptor) = model.type_descriptor(type_name) else {
            return Ok(Self {
                type_name: type_name.to_string(),
                constructor: None,
                arguments: Vec::new(),
                setters: names.to_vec(),
                skipped: Vec::new(),
            });
        };

        let (constructor, arguments) = choose_constructor(descriptor, names)?;
        let mut setters = Vec::new();
        let mut skipped = Vec::new();
        for name in names {
            if arguments.iter().any(|(_, member)| member == name) {
                continue;
            }
            let settable = descriptor.property(name).map_or(true, |p| p.settable);
            if settable {
                setters.push(name.clone());
            } else {
                skipped.push(name.clone());
            }
        }

        Ok(Self {
            type_name: type_name.to_string(),
            constructor,
            arguments,
            setters,
            skipped,
        })
    }
}

type Arguments = Vec<(String, String)>;

fn choose_constructor(descriptor: &TypeDescriptor, names: &[String]) -> DqlResult<(Option<String>, Arguments)> {
    if descriptor.constructors.is_empty() {
        return Ok((None, Vec::new()));
    }

    let satisfied = descriptor.constructors.iter().filter_map(|constructor| {
        constructor
            .parameters
            .iter()
            .map(|p| {
                names
                    .iter()
                    .find(|n| n.eq_ignore_ascii_case(&p.name))
                    .map(|n| (p.name.clone(), n.clone()))
            })
            .collect::<Option<Arguments>>()
            .map(|arguments| (constructor, arguments))
    });

    // parameterless constructors are satisfied trivially, so they lose to
    // any constructor that takes at least one member
    match satisfied.max_by_key(|(_, arguments)| arguments.len()) {
        Some((constructor, arguments)) => Ok((Some(constructor.name.clone()), arguments)),
        None => Err(DqlError::materialization(format!(
            "no constructor of {} can be satisfied by [{}]",
            descriptor.name,
            names.join(", ")
        ))),
    }
}

/// Process-wide plan cache with LRU eviction
pub struct PlanCache {
    entries: DashMap<String, CacheEntry>,
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

struct CacheEntry {
    plan: Arc<MaterializationPlan>,
    last_access: Instant,
}

impl PlanCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: DashMap::with_capacity(max_size),
            max_size: max_size.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Cache key for a type and an unordered set of member names
    pub fn cache_key(type_name: &str, names: &[String]) -> String {
        let mut sorted: Vec<&str> = names.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        format!("{}:{}", type_name, sorted.join(","))
    }

    pub fn plan_for(&self, model: &Model, type_name: &str, names: &[String]) -> DqlResult<Arc<MaterializationPlan>> {
        let key = Self::cache_key(type_name, names);

        if let Some(mut entry) = self.entries.get_mut(&key) {
            entry.last_access = Instant::now();
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(entry.plan.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let plan = Arc::new(MaterializationPlan::build(model, type_name, names)?);
        tracing::trace!(
            "[MATERIALIZER] Planned {} via {:?}",
            type_name,
            plan.constructor
        );

        if self.entries.len() >= self.max_size {
            self.evict_lru();
        }
        self.entries.insert(
            key,
            CacheEntry {
                plan: plan.clone(),
                last_access: Instant::now(),
            },
        );
        Ok(plan)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    fn evict_lru(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.last_access)
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            max_size: self.max_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}
