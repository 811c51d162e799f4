//! Graph store adapter.
//!
//! Every write merges (create if absent, else match) so a redelivered job
//! rewrites the same nodes and edges. Findings are the exception: each one is
//! a fresh node keyed by its generated id.

use crate::error::{CoreError, Result};
use crate::model::{Finding, Severity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{Graph, Query, Row, query};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Merge the page, the scan, `(scan)-[:SCANNED]->(page)` and a
    /// `LINKS_TO` edge to every link target, in one idempotent write.
    async fn merge_page_visit(&self, scan_id: &str, url: &str, title: &str, links: &[String]) -> Result<()>;

    /// Attach a new finding to its page and scan.
    async fn create_finding(&self, finding: &Finding) -> Result<()>;

    async fn count_pages(&self) -> Result<u64>;

    async fn count_findings(&self, severity: Severity) -> Result<u64>;
}

const MERGE_PAGE_VISIT: &str = "
    MERGE (p:Page {url: $url})
    SET p.title = $title, p.lastScanned = datetime($now)
    MERGE (s:Scan {id: $scanId})
    MERGE (s)-[:SCANNED]->(p)
    WITH p
    UNWIND $links AS link
    MERGE (l:Page {url: link})
    MERGE (p)-[:LINKS_TO]->(l)
";

const CREATE_FINDING: &str = "
    MATCH (p:Page {url: $url})
    MATCH (s:Scan {id: $scanId})
    MERGE (f:Finding {id: $id})
    SET f.type = $type,
        f.severity = $severity,
        f.description = $description,
        f.data = $data,
        f.createdAt = datetime($createdAt)
    MERGE (p)-[:HAS_FINDING]->(f)
    MERGE (s)-[:FOUND]->(f)
";

const COUNT_PAGES: &str = "MATCH (p:Page) RETURN count(p) AS count";

const COUNT_FINDINGS: &str = "MATCH (f:Finding {severity: $severity}) RETURN count(f) AS count";

/// Neo4j over bolt. The driver hands each query a pooled connection and takes
/// it back when the query's stream is exhausted or dropped.
pub struct Neo4jGraph {
    graph: Graph,
}

impl Neo4jGraph {
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password).await?;
        info!("Connected to graph store at {}", uri);
        Ok(Self { graph })
    }

    /// Run one parameterized query and collect its rows.
    pub async fn run_query(&self, q: Query) -> Result<Vec<Row>> {
        let mut stream = self.graph.execute(q).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn count(&self, q: Query) -> Result<u64> {
        let rows = self.run_query(q).await?;
        let Some(row) = rows.first() else {
            return Ok(0);
        };
        let count: i64 = row
            .get("count")
            .map_err(|e| CoreError::Store(format!("count column: {e}")))?;
        Ok(count.max(0) as u64)
    }
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

#[async_trait]
impl GraphStore for Neo4jGraph {
    async fn merge_page_visit(&self, scan_id: &str, url: &str, title: &str, links: &[String]) -> Result<()> {
        let q = query(MERGE_PAGE_VISIT)
            .param("url", url)
            .param("title", title)
            .param("now", format_datetime(&Utc::now()))
            .param("scanId", scan_id)
            .param("links", links.to_vec());

        self.run_query(q).await?;
        debug!("Merged page {} with {} links for scan {}", url, links.len(), scan_id);
        Ok(())
    }

    async fn create_finding(&self, finding: &Finding) -> Result<()> {
        let q = query(CREATE_FINDING)
            .param("id", finding.id.to_string())
            .param("url", finding.page_url.as_str())
            .param("scanId", finding.scan_id.as_str())
            .param("type", finding.finding_type.as_str())
            .param("severity", finding.severity.as_str())
            .param("description", finding.description.as_str())
            .param("data", finding.data.as_str())
            .param("createdAt", format_datetime(&finding.created_at));

        self.run_query(q).await?;
        info!("Saved finding {} ({}) on {}", finding.id, finding.finding_type, finding.page_url);
        Ok(())
    }

    async fn count_pages(&self) -> Result<u64> {
        self.count(query(COUNT_PAGES)).await
    }

    async fn count_findings(&self, severity: Severity) -> Result<u64> {
        self.count(query(COUNT_FINDINGS).param("severity", severity.as_str()))
            .await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GraphNode {
    Page {
        url: String,
        title: String,
        last_scanned: Option<DateTime<Utc>>,
    },
    Scan {
        id: String,
    },
    Finding(Finding),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Scanned,
    LinksTo,
    HasFinding,
    Found,
}

#[derive(Default)]
struct MemoryGraphInner {
    graph: DiGraph<GraphNode, Relation>,
    pages: HashMap<String, NodeIndex>,
    scans: HashMap<String, NodeIndex>,
}

impl MemoryGraphInner {
    fn merge_page(&mut self, url: &str) -> NodeIndex {
        if let Some(idx) = self.pages.get(url) {
            return *idx;
        }
        let idx = self.graph.add_node(GraphNode::Page {
            url: url.to_string(),
            title: String::new(),
            last_scanned: None,
        });
        self.pages.insert(url.to_string(), idx);
        idx
    }

    fn merge_scan(&mut self, scan_id: &str) -> NodeIndex {
        if let Some(idx) = self.scans.get(scan_id) {
            return *idx;
        }
        let idx = self.graph.add_node(GraphNode::Scan {
            id: scan_id.to_string(),
        });
        self.scans.insert(scan_id.to_string(), idx);
        idx
    }

    fn merge_edge(&mut self, from: NodeIndex, to: NodeIndex, relation: Relation) {
        let exists = self
            .graph
            .edges_connecting(from, to)
            .any(|edge| *edge.weight() == relation);
        if !exists {
            self.graph.add_edge(from, to, relation);
        }
    }

    fn targets(&self, from: NodeIndex, relation: Relation) -> Vec<NodeIndex> {
        let mut targets: Vec<NodeIndex> = self
            .graph
            .edges(from)
            .filter(|edge| *edge.weight() == relation)
            .map(|edge| edge.target())
            .collect();
        targets.sort();
        targets
    }
}

/// Graph store held in process memory, with the same merge semantics as the
/// Neo4j adapter. Used by the local `scan` command and by tests.
#[derive(Default)]
pub struct MemoryGraph {
    inner: Mutex<MemoryGraphInner>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn page_title(&self, url: &str) -> Option<String> {
        let inner = self.inner.lock().await;
        let idx = inner.pages.get(url)?;
        match &inner.graph[*idx] {
            GraphNode::Page { title, .. } => Some(title.clone()),
            _ => None,
        }
    }

    /// `LINKS_TO` targets of a page, ordered by when each target node was
    /// first merged.
    pub async fn links_from(&self, url: &str) -> Vec<String> {
        let inner = self.inner.lock().await;
        let Some(idx) = inner.pages.get(url) else {
            return Vec::new();
        };
        inner
            .targets(*idx, Relation::LinksTo)
            .into_iter()
            .filter_map(|t| match &inner.graph[t] {
                GraphNode::Page { url, .. } => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of `SCANNED` edges from a scan to a page.
    pub async fn scanned_edges(&self, scan_id: &str, url: &str) -> usize {
        let inner = self.inner.lock().await;
        match (inner.scans.get(scan_id), inner.pages.get(url)) {
            (Some(scan), Some(page)) => inner
                .graph
                .edges_connecting(*scan, *page)
                .filter(|edge| *edge.weight() == Relation::Scanned)
                .count(),
            _ => 0,
        }
    }

    pub async fn findings(&self) -> Vec<Finding> {
        let inner = self.inner.lock().await;
        inner
            .graph
            .node_weights()
            .filter_map(|node| match node {
                GraphNode::Finding(f) => Some(f.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn findings_on_page(&self, url: &str) -> Vec<Finding> {
        let inner = self.inner.lock().await;
        let Some(idx) = inner.pages.get(url) else {
            return Vec::new();
        };
        inner
            .targets(*idx, Relation::HasFinding)
            .into_iter()
            .filter_map(|t| match &inner.graph[t] {
                GraphNode::Finding(f) => Some(f.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn node_count(&self) -> usize {
        self.inner.lock().await.graph.node_count()
    }

    pub async fn edge_count(&self) -> usize {
        self.inner.lock().await.graph.edge_count()
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn merge_page_visit(&self, scan_id: &str, url: &str, title: &str, links: &[String]) -> Result<()> {
        let mut inner = self.inner.lock().await;

        let page = inner.merge_page(url);
        if let GraphNode::Page {
            title: page_title,
            last_scanned,
            ..
        } = &mut inner.graph[page]
        {
            *page_title = title.to_string();
            *last_scanned = Some(Utc::now());
        }

        let scan = inner.merge_scan(scan_id);
        inner.merge_edge(scan, page, Relation::Scanned);

        for link in links {
            let target = inner.merge_page(link);
            inner.merge_edge(page, target, Relation::LinksTo);
        }

        debug!("Merged page {} with {} links for scan {}", url, links.len(), scan_id);
        Ok(())
    }

    async fn create_finding(&self, finding: &Finding) -> Result<()> {
        let mut inner = self.inner.lock().await;

        let (Some(page), Some(scan)) = (
            inner.pages.get(&finding.page_url).copied(),
            inner.scans.get(&finding.scan_id).copied(),
        ) else {
            warn!(
                "Finding {} dropped: page {} or scan {} not in graph",
                finding.id, finding.page_url, finding.scan_id
            );
            return Ok(());
        };

        let node = inner.graph.add_node(GraphNode::Finding(finding.clone()));
        inner.merge_edge(page, node, Relation::HasFinding);
        inner.merge_edge(scan, node, Relation::Found);
        Ok(())
    }

    async fn count_pages(&self) -> Result<u64> {
        Ok(self.inner.lock().await.pages.len() as u64)
    }

    async fn count_findings(&self, severity: Severity) -> Result<u64> {
        let inner = self.inner.lock().await;
        Ok(inner
            .graph
            .node_weights()
            .filter(|node| matches!(node, GraphNode::Finding(f) if f.severity == severity))
            .count() as u64)
    }
}
