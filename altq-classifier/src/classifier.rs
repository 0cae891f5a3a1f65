use std::fmt;

use altq_common::{Arena, Key};
use altq_wire::{Flow, FlowExtractor, Packet};
use tracing::{debug, trace};

use crate::{
    filter::{fbmask, Rule},
    Error, FlowFilter, Result,
};

/// Number of hashed buckets.
pub const ACC_FILTER_TABLESIZE: usize = 256;
const ACC_FILTER_MASK: u32 = (ACC_FILTER_TABLESIZE - 1) as u32;
/// Index of the bucket holding filters with no exact hash key.
pub const ACC_WILDCARD_INDEX: usize = ACC_FILTER_TABLESIZE;

#[inline]
fn hash_index(key: u32) -> usize {
    let x = key.wrapping_add(key >> 16);
    (x.wrapping_add(x >> 8) & ACC_FILTER_MASK) as usize
}

/// Opaque handle of an installed filter.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterHandle(Key);

impl fmt::Debug for FilterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "filter#{:?}", self.0)
    }
}

#[derive(Debug)]
struct Entry<C> {
    rule: Rule,
    ruleno: u32,
    fbmask: u32,
    bucket: usize,
    class: C,
}

/// A set of flow filters mapping packets to classes of type `C`.
#[derive(Debug)]
pub struct Classifier<C> {
    filters: Arena<Entry<C>>,
    /// Filter keys per bucket, in descending rule-number order.
    buckets: Vec<Vec<Key>>,
    /// Union of the field bitmasks of all IPv4 filters.
    fbmask4: u32,
    /// Union of the field bitmasks of all IPv6 filters.
    fbmask6: u32,
    extractor: FlowExtractor,
}

impl<C> Default for Classifier<C> {
    fn default() -> Self {
        Self {
            filters: Arena::new(),
            buckets: vec![Vec::new(); ACC_FILTER_TABLESIZE + 1],
            fbmask4: 0,
            fbmask6: 0,
            extractor: FlowExtractor::new(),
        }
    }
}

impl<C: Copy + PartialEq + fmt::Debug> Classifier<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `filter`, bound to `class`.
    pub fn add_filter(&mut self, filter: FlowFilter, class: C) -> Result<FilterHandle> {
        let (rule, ruleno) = filter.normalize()?;

        let bucket = match &rule {
            Rule::V4(r) if r.dst_mask == u32::MAX => hash_index(r.dst),
            Rule::V4(_) => ACC_WILDCARD_INDEX,
            Rule::V6(r) if r.flow_label != 0 => hash_index(r.flow_label),
            Rule::V6(_) => ACC_WILDCARD_INDEX,
        };

        let fbm = rule.fbmask();
        match rule {
            Rule::V4(_) => self.fbmask4 |= fbm,
            Rule::V6(_) => self.fbmask6 |= fbm,
        }

        let key = self.filters.insert(Entry { rule, ruleno, fbmask: fbm, bucket, class });

        // A new filter goes in front of existing filters with the same rule number.
        let chain = &mut self.buckets[bucket];
        let pos = chain
            .iter()
            .position(|k| self.filters.get(*k).map_or(true, |e| e.ruleno <= ruleno))
            .unwrap_or(chain.len());
        chain.insert(pos, key);

        debug!(?class, ruleno, bucket, "added filter");
        Ok(FilterHandle(key))
    }

    /// Removes a single filter.
    pub fn delete_filter(&mut self, handle: FilterHandle) -> Result<()> {
        let entry = self.filters.remove(handle.0).ok_or(Error::FilterNotFound)?;
        self.buckets[entry.bucket].retain(|k| *k != handle.0);
        self.recompute_fbmask();

        debug!(?handle, class = ?entry.class, "deleted filter");
        Ok(())
    }

    /// Removes every filter bound to `class`, returning how many were removed.
    pub fn discard_class(&mut self, class: C) -> usize {
        let doomed: Vec<Key> =
            self.filters.iter().filter(|(_, e)| e.class == class).map(|(k, _)| k).collect();

        for key in &doomed {
            if let Some(entry) = self.filters.remove(*key) {
                self.buckets[entry.bucket].retain(|k| k != key);
            }
        }
        if !doomed.is_empty() {
            self.recompute_fbmask();
            debug!(?class, removed = doomed.len(), "discarded filters of class");
        }
        doomed.len()
    }

    /// Removes every filter.
    pub fn clear(&mut self) {
        self.filters.clear();
        self.buckets.iter_mut().for_each(Vec::clear);
        self.fbmask4 = 0;
        self.fbmask6 = 0;
    }

    /// The class a filter is bound to.
    pub fn filter_class(&self, handle: FilterHandle) -> Option<C> {
        self.filters.get(handle.0).map(|e| e.class)
    }

    /// Handles of the filters bound to `class`.
    pub fn filters_of(&self, class: C) -> Vec<FilterHandle> {
        self.filters.iter().filter(|(_, e)| e.class == class).map(|(k, _)| FilterHandle(k)).collect()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    fn recompute_fbmask(&mut self) {
        let (mut m4, mut m6) = (0, 0);
        for (_, e) in self.filters.iter() {
            match e.rule {
                Rule::V4(_) => m4 |= e.fbmask,
                Rule::V6(_) => m6 |= e.fbmask,
            }
        }
        (self.fbmask4, self.fbmask6) = (m4, m6);
    }

    /// Classifies a packet, extracting its flow first. Ports are only parsed when some
    /// installed filter references them.
    pub fn classify(&mut self, pkt: &Packet) -> Option<C> {
        if self.filters.is_empty() {
            return None;
        }
        let need_ports = (self.fbmask4 | self.fbmask6) & fbmask::PORTS != 0;
        let flow = self.extractor.extract(pkt, need_ports)?;
        let class = self.classify_flow(&flow);
        trace!(?flow, ?class, "classified");
        class
    }

    /// Classifies an already extracted flow.
    pub fn classify_flow(&self, flow: &Flow) -> Option<C> {
        match flow {
            Flow::V4(f) => {
                let m = self.fbmask4;
                if m == fbmask::TOS {
                    return self.scan(ACC_WILDCARD_INDEX, |r, fbm| match r {
                        Rule::V4(r) => r.matches_tos(fbm, f),
                        Rule::V6(_) => false,
                    });
                }
                if m & !(fbmask::PROTO | fbmask::SPORT | fbmask::DPORT) == 0 {
                    return self.scan(ACC_WILDCARD_INDEX, |r, fbm| match r {
                        Rule::V4(r) => r.matches_proto_ports(fbm, f),
                        Rule::V6(_) => false,
                    });
                }

                let hashed = hash_index(u32::from(f.dst));
                let matcher = |r: &Rule, fbm: u32| match r {
                    Rule::V4(r) => r.matches(fbm, f),
                    Rule::V6(_) => false,
                };
                self.scan(hashed, matcher).or_else(|| self.scan(ACC_WILDCARD_INDEX, matcher))
            }
            Flow::V6(f) => {
                let matcher = |r: &Rule, fbm: u32| match r {
                    Rule::V6(r) => r.matches(fbm, f),
                    Rule::V4(_) => false,
                };
                if f.flow_label != 0 {
                    if let Some(class) = self.scan(hash_index(f.flow_label), matcher) {
                        return Some(class);
                    }
                }
                self.scan(ACC_WILDCARD_INDEX, matcher)
            }
        }
    }

    fn scan(&self, bucket: usize, matches: impl Fn(&Rule, u32) -> bool) -> Option<C> {
        self.buckets[bucket]
            .iter()
            .filter_map(|k| self.filters.get(*k))
            .find(|e| matches(&e.rule, e.fbmask))
            .map(|e| e.class)
    }
}
