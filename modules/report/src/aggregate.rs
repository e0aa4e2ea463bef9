//! Batch merge of probed candidates into unique service records.
//!
//! Records are keyed by `(service name, detected protocol, port)`, with the
//! name compared case-insensitively. The first record for a key wins.

use std::collections::HashSet;
use svcscan_core::names::is_unknown;
use svcscan_core::{Candidate, ProbeOutcome, Protocol, ServiceNames, ServiceRecord, UNKNOWN_SERVICE};
use tracing::debug;

type RecordKey = (String, Protocol, u16);

pub struct Aggregator<'a> {
    hostname: String,
    names: &'a ServiceNames,
    seen: HashSet<RecordKey>,
    records: Vec<(usize, ServiceRecord)>,
    dropped: usize,
}

impl<'a> Aggregator<'a> {
    pub fn new(hostname: impl Into<String>, names: &'a ServiceNames) -> Self {
        Aggregator { hostname: hostname.into(), names, seen: HashSet::new(), records: Vec::new(), dropped: 0 }
    }

    /// Add the probed candidate seen at position `order` in discovery order.
    /// Returns false when a record with the same key already exists.
    pub fn add(&mut self, order: usize, candidate: &Candidate, outcome: &ProbeOutcome) -> bool {
        let service_name = if is_unknown(&candidate.service_name) {
            self.names
                .lookup(candidate.port, candidate.protocol)
                .unwrap_or_else(|| UNKNOWN_SERVICE.to_string())
        } else {
            candidate.service_name.trim().to_string()
        };
        let key = (service_name.to_lowercase(), outcome.detected_protocol, candidate.port);
        if !self.seen.insert(key) {
            self.dropped += 1;
            debug!(
                name = %service_name,
                protocol = %outcome.detected_protocol,
                port = candidate.port,
                source = %candidate.source,
                "duplicate service dropped"
            );
            return false;
        }
        let note = [candidate.note.as_deref().unwrap_or(""), outcome.note.as_str()]
            .iter()
            .filter(|n| !n.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" | ");
        let record = ServiceRecord {
            hostname: self.hostname.clone(),
            service_name,
            protocol: outcome.detected_protocol,
            port: candidate.port,
            status: outcome.status,
            latency_ms: outcome.latency_ms,
            source: candidate.source.clone(),
            note,
        };
        self.records.push((order, record));
        true
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Records in discovery order, ties broken by port.
    pub fn finish(mut self) -> Vec<ServiceRecord> {
        self.records.sort_by_key(|(order, r)| (*order, r.port));
        self.records.into_iter().map(|(_, r)| r).collect()
    }
}

/// Aggregate `(candidate, outcome)` pairs given in discovery order.
/// Returns the records and the number of dropped duplicates.
pub fn aggregate<'c, I>(hostname: &str, names: &ServiceNames, items: I) -> (Vec<ServiceRecord>, usize)
where
    I: IntoIterator<Item = (&'c Candidate, &'c ProbeOutcome)>,
{
    let mut agg = Aggregator::new(hostname, names);
    for (order, (c, o)) in items.into_iter().enumerate() {
        agg.add(order, c, o);
    }
    let dropped = agg.dropped();
    (agg.finish(), dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use svcscan_core::ProbeStatus;

    fn refused() -> ProbeOutcome {
        ProbeOutcome { status: Some(ProbeStatus::Refused), latency_ms: Some(0), detected_protocol: Protocol::Tcp, note: String::new() }
    }

    fn http() -> ProbeOutcome {
        ProbeOutcome { status: Some(ProbeStatus::Success), latency_ms: Some(1), detected_protocol: Protocol::Http, note: "status=200".into() }
    }

    #[test]
    fn union_of_sources_is_deduplicated() {
        let names = ServiceNames::default();
        let a = Candidate::new("nginx", Protocol::Tcp, 80, "proc");
        let b = Candidate::new("nginx", Protocol::Tcp, 80, "ss");
        let c = Candidate::new("NGINX", Protocol::Tcp, 80, "docker");
        let o = http();
        let (records, dropped) = aggregate("h", &names, [(&a, &o), (&b, &o), (&c, &o)]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, "proc");
        assert_eq!(dropped, 2);

        // the same candidates again keep the same single record
        let (again, _) = aggregate("h", &names, [(&a, &o), (&b, &o), (&c, &o), (&a, &o), (&b, &o)]);
        assert_eq!(again, records);
    }

    #[test]
    fn detected_protocol_is_the_key() {
        let names = ServiceNames::default();
        let c = Candidate::new("web", Protocol::Tcp, 8080, "proc");
        let (records, _) = aggregate("h", &names, [(&c, &http())]);
        assert_eq!(records[0].protocol, Protocol::Http);
    }

    #[test]
    fn unknown_names_are_resolved_before_keying() {
        let names = ServiceNames::default();
        let a = Candidate::new("Unknown", Protocol::Tcp, 22, "enum1");
        let b = Candidate::new("SSH", Protocol::Tcp, 22, "enum2");
        let o = refused();
        let (records, dropped) = aggregate("h", &names, [(&a, &o), (&b, &o)]);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].service_name, "SSH");
        assert_eq!(records[0].source, "enum1");
        assert_eq!(dropped, 1);
    }

    #[test]
    fn notes_are_merged_and_order_is_discovery_order() {
        let names = ServiceNames::default();
        let mut agg = Aggregator::new("h", &names);
        let later = Candidate::new("web", Protocol::Tcp, 80, "docker").with_note("image=nginx:1.25");
        let earlier = Candidate::new("db", Protocol::Tcp, 5432, "proc");
        agg.add(1, &later, &http());
        agg.add(0, &earlier, &refused());
        let records = agg.finish();
        assert_eq!(records[0].port, 5432);
        assert_eq!(records[1].note, "image=nginx:1.25 | status=200");
    }
}
