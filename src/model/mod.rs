//! Influence-diagram graph model.
//!
//! Entities are plain data: a typed [`Issue`] owns exactly one graph
//! [`Node`], nodes are connected by directed [`Edge`]s, and the payload
//! attached to an issue ([`Decision`], [`Uncertainty`], [`Utility`])
//! matches its [`IssueKind`]. The two derived relations
//! ([`DiscreteProbability`], [`DiscreteUtility`]) are regenerated wholesale
//! by the engine and never edited structurally in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::{uuid, Uuid};

/// Value-metric id every regenerated utility row is attached to.
pub const DEFAULT_VALUE_METRIC_ID: Uuid = uuid!("288e0811-7ab6-5d24-b80c-9fa925b848a6");

/// Name of the default value metric.
pub const DEFAULT_VALUE_METRIC_NAME: &str = "value";

/// Kind of an issue in the decision network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Not yet classified.
    #[default]
    Unassigned,
    /// A decision with discrete options.
    Decision,
    /// An uncertainty with discrete outcomes.
    Uncertainty,
    /// A known fact; contributes no dimension.
    Fact,
    /// A terminal utility node.
    Utility,
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueKind::Unassigned => write!(f, "unassigned"),
            IssueKind::Decision => write!(f, "decision"),
            IssueKind::Uncertainty => write!(f, "uncertainty"),
            IssueKind::Fact => write!(f, "fact"),
            IssueKind::Utility => write!(f, "utility"),
        }
    }
}

impl std::str::FromStr for IssueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unassigned" => Ok(IssueKind::Unassigned),
            "decision" => Ok(IssueKind::Decision),
            "uncertainty" => Ok(IssueKind::Uncertainty),
            "fact" => Ok(IssueKind::Fact),
            "utility" => Ok(IssueKind::Utility),
            _ => Err(format!("Unknown issue kind: {}", s)),
        }
    }
}

/// Analysis-scope boundary of an issue.
///
/// Only `In` and `On` issues may contribute a parent dimension to
/// downstream tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    /// Inside the analysis scope.
    #[default]
    In,
    /// On the scope edge, still contributing.
    On,
    /// Excluded from derived computation.
    Out,
}

impl Boundary {
    /// Whether an issue with this boundary contributes to downstream tables.
    pub fn in_scope(self) -> bool {
        matches!(self, Boundary::In | Boundary::On)
    }
}

impl std::fmt::Display for Boundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Boundary::In => write!(f, "in"),
            Boundary::On => write!(f, "on"),
            Boundary::Out => write!(f, "out"),
        }
    }
}

impl std::str::FromStr for Boundary {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in" => Ok(Boundary::In),
            "on" => Ok(Boundary::On),
            "out" => Ok(Boundary::Out),
            _ => Err(format!("Unknown boundary: {}", s)),
        }
    }
}

/// Hierarchy level of a decision.
///
/// Only `Focus` decisions contribute an option dimension downstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionHierarchy {
    /// Policy-level decision, taken as given.
    #[default]
    Policy,
    /// The decision currently being analysed.
    Focus,
    /// Tactical follow-on decision.
    Tactical,
}

impl DecisionHierarchy {
    /// Whether this is the focus decision of the analysis.
    pub fn is_focus(self) -> bool {
        matches!(self, DecisionHierarchy::Focus)
    }
}

impl std::fmt::Display for DecisionHierarchy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionHierarchy::Policy => write!(f, "policy"),
            DecisionHierarchy::Focus => write!(f, "focus"),
            DecisionHierarchy::Tactical => write!(f, "tactical"),
        }
    }
}

impl std::str::FromStr for DecisionHierarchy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "policy" => Ok(DecisionHierarchy::Policy),
            "focus" => Ok(DecisionHierarchy::Focus),
            "tactical" => Ok(DecisionHierarchy::Tactical),
            _ => Err(format!("Unknown decision hierarchy: {}", s)),
        }
    }
}

/// A typed node definition in the decision network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    /// Unique issue identifier.
    pub id: Uuid,
    /// Owning project.
    pub project_id: Uuid,
    /// Kind of this issue; the attached payload must match.
    pub kind: IssueKind,
    /// Analysis-scope boundary.
    pub boundary: Boundary,
    /// Human-readable name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Display order within the project.
    pub order: i32,
    /// When the issue was created.
    pub created_at: DateTime<Utc>,
    /// When the issue was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Issue {
    /// Create a new unassigned, in-scope issue.
    pub fn new(project_id: Uuid, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            kind: IssueKind::Unassigned,
            boundary: Boundary::In,
            name: name.into(),
            description: String::new(),
            order: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the issue kind.
    pub fn with_kind(mut self, kind: IssueKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the boundary.
    pub fn with_boundary(mut self, boundary: Boundary) -> Self {
        self.boundary = boundary;
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the display order.
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

/// The graph vertex owned by an issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier.
    pub id: Uuid,
    /// Owning project.
    pub project_id: Uuid,
    /// The issue this node represents.
    pub issue_id: Uuid,
    /// Display name, usually mirroring the issue.
    pub name: String,
}

impl Node {
    /// Create a new node for an issue.
    pub fn new(project_id: Uuid, issue_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            issue_id,
            name: String::new(),
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// A directed arc `tail -> head` between two nodes.
///
/// Establishes that the tail's issue is a parent input to the head's issue.
/// Multiple edges between the same pair collapse to one logical
/// relationship before combinatorics run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    /// Unique edge identifier.
    pub id: Uuid,
    /// Owning project.
    pub project_id: Uuid,
    /// Source node id.
    pub tail_id: Uuid,
    /// Target node id.
    pub head_id: Uuid,
}

impl Edge {
    /// Create a new edge between two nodes.
    pub fn new(project_id: Uuid, tail_id: Uuid, head_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            tail_id,
            head_id,
        }
    }
}

/// Decision payload of an issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Unique decision identifier.
    pub id: Uuid,
    /// Owning issue.
    pub issue_id: Uuid,
    /// Hierarchy level; only `Focus` contributes options downstream.
    pub hierarchy: DecisionHierarchy,
}

impl Decision {
    /// Create a new policy-level decision for an issue.
    pub fn new(issue_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            issue_id,
            hierarchy: DecisionHierarchy::Policy,
        }
    }

    /// Set the hierarchy level.
    pub fn with_hierarchy(mut self, hierarchy: DecisionHierarchy) -> Self {
        self.hierarchy = hierarchy;
        self
    }
}

/// One discrete choice of a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionOption {
    /// Unique option identifier.
    pub id: Uuid,
    /// Owning decision.
    pub decision_id: Uuid,
    /// Human-readable name.
    pub name: String,
    /// Utility weight entered by the analyst.
    pub utility: f64,
}

impl DecisionOption {
    /// Create a new option under a decision.
    pub fn new(decision_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            decision_id,
            name: name.into(),
            utility: 0.0,
        }
    }

    /// Set the utility weight.
    pub fn with_utility(mut self, utility: f64) -> Self {
        self.utility = utility;
        self
    }
}

/// Uncertainty payload of an issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Uncertainty {
    /// Unique uncertainty identifier.
    pub id: Uuid,
    /// Owning issue.
    pub issue_id: Uuid,
    /// Only key uncertainties contribute outcomes downstream.
    pub is_key: bool,
}

impl Uncertainty {
    /// Create a new key uncertainty for an issue.
    pub fn new(issue_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            issue_id,
            is_key: true,
        }
    }

    /// Set whether this uncertainty is key.
    pub fn with_is_key(mut self, is_key: bool) -> Self {
        self.is_key = is_key;
        self
    }
}

/// One discrete state of an uncertainty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    /// Unique outcome identifier.
    pub id: Uuid,
    /// Owning uncertainty.
    pub uncertainty_id: Uuid,
    /// Human-readable name.
    pub name: String,
    /// Utility weight entered by the analyst.
    pub utility: f64,
}

impl Outcome {
    /// Create a new outcome under an uncertainty.
    pub fn new(uncertainty_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            uncertainty_id,
            name: name.into(),
            utility: 0.0,
        }
    }

    /// Set the utility weight.
    pub fn with_utility(mut self, utility: f64) -> Self {
        self.utility = utility;
        self
    }
}

/// Utility payload of an issue; a terminal node that only consumes
/// parent dimensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utility {
    /// Unique utility identifier.
    pub id: Uuid,
    /// Owning issue.
    pub issue_id: Uuid,
}

impl Utility {
    /// Create a new utility payload for an issue.
    pub fn new(issue_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            issue_id,
        }
    }
}

/// A metric utility values are expressed in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueMetric {
    /// Unique metric identifier.
    pub id: Uuid,
    /// Metric name.
    pub name: String,
}

impl ValueMetric {
    /// Create a new value metric.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
        }
    }

    /// The built-in default metric.
    pub fn default_metric() -> Self {
        Self {
            id: DEFAULT_VALUE_METRIC_ID,
            name: DEFAULT_VALUE_METRIC_NAME.to_string(),
        }
    }
}

/// A named bundle of option choices across decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    /// Unique strategy identifier.
    pub id: Uuid,
    /// Owning project.
    pub project_id: Uuid,
    /// Human-readable name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Why this strategy is considered.
    pub rationale: String,
    /// When the strategy was created.
    pub created_at: DateTime<Utc>,
    /// When the strategy was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Strategy {
    /// Create a new strategy.
    pub fn new(project_id: Uuid, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            name: name.into(),
            description: String::new(),
            rationale: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the rationale.
    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }
}

/// Junction linking a strategy to one chosen option.
///
/// Pruned by the engine when the option's decision leaves Focus or
/// boundary scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyOption {
    /// The strategy.
    pub strategy_id: Uuid,
    /// The chosen option.
    pub option_id: Uuid,
}

impl StrategyOption {
    /// Create a new strategy-option link.
    pub fn new(strategy_id: Uuid, option_id: Uuid) -> Self {
        Self {
            strategy_id,
            option_id,
        }
    }
}

/// One row of an uncertainty's derived probability table.
///
/// The full row set for an uncertainty equals its own outcomes crossed
/// with every combination of qualifying parent dimensions. Rows are
/// regenerated with fresh ids whenever the owner is affected; edited
/// probability values are deliberately discarded on regeneration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscreteProbability {
    /// Unique row identifier, minted fresh on every rebuild.
    pub id: Uuid,
    /// Owning uncertainty.
    pub uncertainty_id: Uuid,
    /// The own-outcome this row is conditioned on.
    pub outcome_id: Uuid,
    /// Probability value; seeded at the neutral default of 0.0.
    pub probability: f64,
    /// Parent option ids of the combination this row corresponds to,
    /// sorted by id.
    pub parent_option_ids: Vec<Uuid>,
    /// Parent outcome ids of the combination, sorted by id.
    pub parent_outcome_ids: Vec<Uuid>,
}

impl DiscreteProbability {
    /// Create a freshly generated row with no parent links.
    pub fn generated(uncertainty_id: Uuid, outcome_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            uncertainty_id,
            outcome_id,
            probability: 0.0,
            parent_option_ids: Vec::new(),
            parent_outcome_ids: Vec::new(),
        }
    }

    /// Attach the parent option ids of this row's combination.
    pub fn with_parent_options(mut self, option_ids: Vec<Uuid>) -> Self {
        self.parent_option_ids = option_ids;
        self
    }

    /// Attach the parent outcome ids of this row's combination.
    pub fn with_parent_outcomes(mut self, outcome_ids: Vec<Uuid>) -> Self {
        self.parent_outcome_ids = outcome_ids;
        self
    }
}

/// One row of a utility's derived table.
///
/// Rows map 1:1 to combinations of qualifying parent dimensions; a
/// utility with zero qualifying parents has zero rows (unlike the
/// uncertainty no-parent case, which still emits one row per outcome).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscreteUtility {
    /// Unique row identifier, minted fresh on every rebuild.
    pub id: Uuid,
    /// Owning utility.
    pub utility_id: Uuid,
    /// Metric the value is expressed in.
    pub value_metric_id: Uuid,
    /// Utility value; seeded at the neutral default of 0.0.
    pub value: f64,
    /// Parent option ids of the combination, sorted by id.
    pub parent_option_ids: Vec<Uuid>,
    /// Parent outcome ids of the combination, sorted by id.
    pub parent_outcome_ids: Vec<Uuid>,
}

impl DiscreteUtility {
    /// Create a freshly generated row with no parent links.
    pub fn generated(utility_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            utility_id,
            value_metric_id: DEFAULT_VALUE_METRIC_ID,
            value: 0.0,
            parent_option_ids: Vec::new(),
            parent_outcome_ids: Vec::new(),
        }
    }

    /// Attach the parent option ids of this row's combination.
    pub fn with_parent_options(mut self, option_ids: Vec<Uuid>) -> Self {
        self.parent_option_ids = option_ids;
        self
    }

    /// Attach the parent outcome ids of this row's combination.
    pub fn with_parent_outcomes(mut self, outcome_ids: Vec<Uuid>) -> Self {
        self.parent_outcome_ids = outcome_ids;
        self
    }
}

/// Junction linking a probability row to one parent option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbabilityParentOption {
    /// Owning probability row.
    pub discrete_probability_id: Uuid,
    /// The parent option.
    pub parent_option_id: Uuid,
}

/// Junction linking a probability row to one parent outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbabilityParentOutcome {
    /// Owning probability row.
    pub discrete_probability_id: Uuid,
    /// The parent outcome.
    pub parent_outcome_id: Uuid,
}

/// Junction linking a utility row to one parent option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtilityParentOption {
    /// Owning utility row.
    pub discrete_utility_id: Uuid,
    /// The parent option.
    pub parent_option_id: Uuid,
}

/// Junction linking a utility row to one parent outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtilityParentOutcome {
    /// Owning utility row.
    pub discrete_utility_id: Uuid,
    /// The parent outcome.
    pub parent_outcome_id: Uuid,
}
