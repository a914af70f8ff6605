//! Test-case planner
//!
//! Turns a catalog (full/readonly) or a fixture list into an ordered plan.
//! Fixture plans are topologically sorted on `depends_on`, breaking ties by
//! priority and then declaration order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::{debug, info};

use contractprobe_common::{
    path_placeholders, EndpointDescriptor, FixtureCase, HttpMethod, ResourceTriad, RunConfig,
    RunMode, TestResult,
};

use crate::catalog::{Blacklist, Catalog};
use crate::error::PlanningError;

/// What a plan entry probes
#[derive(Debug, Clone, PartialEq)]
pub enum EntryKind {
    /// GET, DELETE, POST, VERIFY, COMPARE against one resource
    Full { resource: String, triad: ResourceTriad },
    /// Single GET
    Readonly { endpoint: EndpointDescriptor },
    /// POST a fixture case
    Fixture { case: FixtureCase },
}

/// One schedulable unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntry {
    pub id: String,
    pub kind: EntryKind,
    /// Indices of entries that must reach a terminal state first
    pub depends_on: Vec<usize>,
}

/// Ordered entries plus the results of everything skipped at planning time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub entries: Vec<PlanEntry>,
    pub skipped: Vec<TestResult>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Knobs the planner honours
#[derive(Debug, Clone, Default)]
pub struct PlanFilters {
    /// Fixture module tag
    pub module: Option<String>,
    /// Resource allow-list for full/readonly; empty means all
    pub resources: Vec<String>,
    /// Names of path parameters that have a binding
    pub bound_params: HashSet<String>,
    /// Unbound parameters will be discovered at run time
    pub use_real_data: bool,
}

impl PlanFilters {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            module: config.module.clone(),
            resources: config.resources.clone(),
            bound_params: config.path_params.keys().cloned().collect(),
            use_real_data: config.use_real_data,
        }
    }

    fn wants_resource(&self, resource: &str) -> bool {
        self.resources.is_empty() || self.resources.iter().any(|r| r == resource)
    }

    fn unbound<'a>(&self, paths: impl IntoIterator<Item = &'a str>) -> Option<String> {
        if self.use_real_data {
            return None;
        }
        paths
            .into_iter()
            .flat_map(path_placeholders)
            .find(|name| !self.bound_params.contains(name))
    }
}

/// Builds execution plans
pub struct Planner {
    blacklist: Blacklist,
    filters: PlanFilters,
}

impl Planner {
    pub fn new(blacklist: Blacklist, filters: PlanFilters) -> Self {
        Self { blacklist, filters }
    }

    /// Build the plan for `mode`. Fixtures are only consulted in fixture mode.
    pub fn build(
        &self,
        catalog: &Catalog,
        fixtures: &[FixtureCase],
        mode: RunMode,
    ) -> Result<Plan, PlanningError> {
        let plan = match mode {
            RunMode::Full => self.plan_full(catalog),
            RunMode::Readonly => self.plan_readonly(catalog),
            RunMode::Fixture => self.plan_fixtures(fixtures)?,
        };
        info!(
            "Planned {} entr{} ({} skipped) in {} mode",
            plan.entries.len(),
            if plan.entries.len() == 1 { "y" } else { "ies" },
            plan.skipped.len(),
            mode
        );
        Ok(plan)
    }

    fn plan_full(&self, catalog: &Catalog) -> Plan {
        let (catalog, _) = catalog.without(&self.blacklist);
        let mut plan = Plan::default();

        for group in catalog.groups() {
            if !self.filters.wants_resource(&group.resource) {
                continue;
            }
            let Some(triad) = group.triad() else {
                debug!("Resource {} lacks a GET/DELETE/POST triad", group.resource);
                plan.skipped.push(TestResult::skipped(
                    &group.resource,
                    "resource does not expose GET, DELETE and POST",
                ));
                continue;
            };
            if let Some(name) = self.filters.unbound([
                triad.get.path.as_str(),
                triad.delete.path.as_str(),
                triad.post.path.as_str(),
            ]) {
                plan.skipped.push(TestResult::skipped(
                    &group.resource,
                    format!("no binding for path parameter {{{}}}", name),
                ));
                continue;
            }
            plan.entries.push(PlanEntry {
                id: group.resource.clone(),
                kind: EntryKind::Full {
                    resource: group.resource,
                    triad,
                },
                depends_on: Vec::new(),
            });
        }
        plan
    }

    fn plan_readonly(&self, catalog: &Catalog) -> Plan {
        let (catalog, _) = catalog.without(&self.blacklist);
        let mut plan = Plan::default();

        for endpoint in catalog.endpoints() {
            if endpoint.method != HttpMethod::Get || !self.filters.wants_resource(&endpoint.resource) {
                continue;
            }
            if let Some(name) = self.filters.unbound([endpoint.path.as_str()]) {
                plan.skipped.push(TestResult::skipped(
                    endpoint.key(),
                    format!("no binding for path parameter {{{}}}", name),
                ));
                continue;
            }
            plan.entries.push(PlanEntry {
                id: endpoint.key(),
                kind: EntryKind::Readonly {
                    endpoint: endpoint.clone(),
                },
                depends_on: Vec::new(),
            });
        }
        plan
    }

    fn plan_fixtures(&self, fixtures: &[FixtureCase]) -> Result<Plan, PlanningError> {
        let cases: Vec<&FixtureCase> = fixtures
            .iter()
            .filter(|c| {
                let excluded = self.blacklist.matches(c.method, &c.endpoint);
                if excluded {
                    debug!("Blacklisted fixture: {} {} {}", c.id, c.method, c.endpoint);
                }
                !excluded
            })
            .collect();

        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, case) in cases.iter().enumerate() {
            if index.insert(case.id.as_str(), i).is_some() {
                return Err(PlanningError::DuplicateCase(case.id.clone()));
            }
        }

        for case in &cases {
            for dep in &case.depends_on {
                if !index.contains_key(dep.as_str()) {
                    return Err(PlanningError::UnknownDependency {
                        case: case.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let selected = self.select_cases(&cases, &index);
        let order = topological_order(&cases, &index, &selected)?;

        let position: HashMap<usize, usize> = order.iter().enumerate().map(|(pos, &i)| (i, pos)).collect();
        let entries = order
            .iter()
            .map(|&i| {
                let case = cases[i];
                PlanEntry {
                    id: case.id.clone(),
                    kind: EntryKind::Fixture { case: case.clone() },
                    depends_on: case
                        .depends_on
                        .iter()
                        .map(|dep| position[&index[dep.as_str()]])
                        .collect(),
                }
            })
            .collect();

        Ok(Plan {
            entries,
            skipped: Vec::new(),
        })
    }

    /// Cases in the module filter plus everything they transitively depend on
    fn select_cases(&self, cases: &[&FixtureCase], index: &HashMap<&str, usize>) -> HashSet<usize> {
        let Some(module) = &self.filters.module else {
            return (0..cases.len()).collect();
        };

        let mut selected = HashSet::new();
        let mut stack: Vec<usize> = cases
            .iter()
            .enumerate()
            .filter(|(_, c)| c.module.as_deref() == Some(module.as_str()))
            .map(|(i, _)| i)
            .collect();
        while let Some(i) = stack.pop() {
            if selected.insert(i) {
                stack.extend(cases[i].depends_on.iter().map(|d| index[d.as_str()]));
            }
        }
        selected
    }
}

/// Kahn's algorithm over the selected cases, smallest (priority, declaration index) first
fn topological_order(
    cases: &[&FixtureCase],
    index: &HashMap<&str, usize>,
    selected: &HashSet<usize>,
) -> Result<Vec<usize>, PlanningError> {
    let mut indegree: HashMap<usize, usize> = selected.iter().map(|&i| (i, 0)).collect();
    let mut dependents: HashMap<usize, Vec<usize>> = HashMap::new();
    for &i in selected {
        for dep in &cases[i].depends_on {
            let d = index[dep.as_str()];
            *indegree.entry(i).or_default() += 1;
            dependents.entry(d).or_default().push(i);
        }
    }

    let mut ready: BinaryHeap<Reverse<(i32, usize)>> = indegree
        .iter()
        .filter(|&(_, &n)| n == 0)
        .map(|(&i, _)| Reverse((cases[i].priority, i)))
        .collect();

    let mut order = Vec::with_capacity(selected.len());
    while let Some(Reverse((_, i))) = ready.pop() {
        order.push(i);
        for &next in dependents.get(&i).map(Vec::as_slice).unwrap_or(&[]) {
            if let Some(n) = indegree.get_mut(&next) {
                *n -= 1;
                if *n == 0 {
                    ready.push(Reverse((cases[next].priority, next)));
                }
            }
        }
    }

    if order.len() < selected.len() {
        let done: HashSet<usize> = order.iter().copied().collect();
        let mut remaining: Vec<usize> = selected.difference(&done).copied().collect();
        remaining.sort_unstable();
        return Err(PlanningError::Cycle(find_cycle(cases, index, &remaining)));
    }
    Ok(order)
}

/// Depth-first search for one cycle among `remaining`
fn find_cycle(cases: &[&FixtureCase], index: &HashMap<&str, usize>, remaining: &[usize]) -> Vec<String> {
    fn dfs(
        node: usize,
        cases: &[&FixtureCase],
        index: &HashMap<&str, usize>,
        visited: &mut HashSet<usize>,
        path: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        if let Some(start) = path.iter().position(|&n| n == node) {
            let mut cycle = path[start..].to_vec();
            cycle.push(node);
            return Some(cycle);
        }
        if !visited.insert(node) {
            return None;
        }
        path.push(node);
        for dep in &cases[node].depends_on {
            if let Some(cycle) = dfs(index[dep.as_str()], cases, index, visited, path) {
                return Some(cycle);
            }
        }
        path.pop();
        None
    }

    let mut visited = HashSet::new();
    for &start in remaining {
        let mut path = Vec::new();
        if let Some(cycle) = dfs(start, cases, index, &mut visited, &mut path) {
            return cycle.into_iter().map(|i| cases[i].id.clone()).collect();
        }
    }
    remaining.iter().map(|&i| cases[i].id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use contractprobe_common::Outcome;

    fn case(id: &str, deps: &[&str], priority: i32) -> FixtureCase {
        let mut case: FixtureCase =
            serde_yaml::from_str(&format!("id: {}\nendpoint: /{}\n", id, id)).unwrap();
        case.depends_on = deps.iter().map(|d| d.to_string()).collect();
        case.priority = priority;
        case
    }

    fn ids(plan: &Plan) -> Vec<&str> {
        plan.entries.iter().map(|e| e.id.as_str()).collect()
    }

    fn planner() -> Planner {
        Planner::new(Blacklist::default(), PlanFilters::default())
    }

    fn catalog(json: &str) -> Catalog {
        Catalog::from_json(json).unwrap()
    }

    #[test]
    fn test_priority_then_declaration_order() {
        let cases = vec![case("c", &[], 5), case("a", &[], 1), case("b", &[], 5)];
        let plan = planner().build(&Catalog::default(), &cases, RunMode::Fixture).unwrap();
        assert_eq!(ids(&plan), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_dependencies_run_first() {
        let cases = vec![
            case("invoice", &["customer"], 1),
            case("customer", &["tenant"], 50),
            case("tenant", &[], 100),
            case("ping", &[], 10),
        ];
        let plan = planner().build(&Catalog::default(), &cases, RunMode::Fixture).unwrap();
        assert_eq!(ids(&plan), vec!["ping", "tenant", "customer", "invoice"]);
        assert_eq!(plan.entries[2].depends_on, vec![1]);
        assert_eq!(plan.entries[3].depends_on, vec![2]);
    }

    #[test]
    fn test_two_case_cycle_rejected() {
        let cases = vec![case("a", &["b"], 1), case("b", &["a"], 1)];
        let err = planner().build(&Catalog::default(), &cases, RunMode::Fixture).unwrap_err();
        match err {
            PlanningError::Cycle(path) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 3);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let cases = vec![case("a", &["a"], 1)];
        assert!(matches!(
            planner().build(&Catalog::default(), &cases, RunMode::Fixture),
            Err(PlanningError::Cycle(_))
        ));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let cases = vec![case("a", &["ghost"], 1)];
        assert_eq!(
            planner().build(&Catalog::default(), &cases, RunMode::Fixture).unwrap_err(),
            PlanningError::UnknownDependency {
                case: "a".to_string(),
                dependency: "ghost".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_case_rejected() {
        let cases = vec![case("a", &[], 1), case("a", &[], 2)];
        assert_eq!(
            planner().build(&Catalog::default(), &cases, RunMode::Fixture).unwrap_err(),
            PlanningError::DuplicateCase("a".to_string())
        );
    }

    #[test]
    fn test_module_filter_pulls_in_dependencies() {
        let mut invoice = case("invoice", &["customer"], 1);
        invoice.module = Some("billing".to_string());
        let cases = vec![case("customer", &[], 1), case("unrelated", &[], 1), invoice];

        let filters = PlanFilters {
            module: Some("billing".to_string()),
            ..Default::default()
        };
        let plan = Planner::new(Blacklist::default(), filters)
            .build(&Catalog::default(), &cases, RunMode::Fixture)
            .unwrap();
        assert_eq!(ids(&plan), vec!["customer", "invoice"]);
    }

    #[test]
    fn test_blacklisted_fixture_dropped() {
        let mut token = case("token", &[], 1);
        token.endpoint = "/oauth/token".to_string();
        let cases = vec![token, case("widget", &[], 1)];
        let plan = planner().build(&Catalog::default(), &cases, RunMode::Fixture).unwrap();
        assert_eq!(ids(&plan), vec!["widget"]);
    }

    #[test]
    fn test_full_mode_skips_groups_without_triad() {
        let catalog = catalog(
            r#"[
            {"path": "/widgets/{id}", "method": "GET", "resource": "widgets"},
            {"path": "/widgets/{id}", "method": "DELETE", "resource": "widgets"},
            {"path": "/widgets", "method": "POST", "resource": "widgets"},
            {"path": "/reports", "method": "GET", "resource": "reports"}
        ]"#,
        );
        let filters = PlanFilters {
            bound_params: ["id".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let plan = Planner::new(Blacklist::default(), filters)
            .build(&catalog, &[], RunMode::Full)
            .unwrap();
        assert_eq!(ids(&plan), vec!["widgets"]);
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].id, "reports");
        assert_eq!(plan.skipped[0].outcome, Outcome::Skipped);
    }

    #[test]
    fn test_full_mode_unbound_parameter_skipped() {
        let catalog = catalog(
            r#"[
            {"path": "/widgets/{id}", "method": "GET", "resource": "widgets"},
            {"path": "/widgets/{id}", "method": "DELETE", "resource": "widgets"},
            {"path": "/widgets", "method": "POST", "resource": "widgets"}
        ]"#,
        );
        let plan = planner().build(&catalog, &[], RunMode::Full).unwrap();
        assert!(plan.is_empty());
        assert!(plan.skipped[0].reason.as_deref().unwrap().contains("{id}"));

        let discovering = Planner::new(
            Blacklist::default(),
            PlanFilters {
                use_real_data: true,
                ..Default::default()
            },
        );
        assert_eq!(discovering.build(&catalog, &[], RunMode::Full).unwrap().entries.len(), 1);
    }

    #[test]
    fn test_readonly_one_entry_per_get() {
        let catalog = catalog(
            r#"[
            {"path": "/widgets", "method": "GET", "resource": "widgets"},
            {"path": "/widgets", "method": "POST", "resource": "widgets"},
            {"path": "/health", "method": "GET", "resource": "system"},
            {"path": "/gadgets", "method": "GET", "resource": "gadgets"}
        ]"#,
        );
        let plan = planner().build(&catalog, &[], RunMode::Readonly).unwrap();
        assert_eq!(ids(&plan), vec!["GET /widgets", "GET /gadgets"]);
    }

    #[test]
    fn test_resource_filter() {
        let catalog = catalog(
            r#"[
            {"path": "/widgets", "method": "GET", "resource": "widgets"},
            {"path": "/gadgets", "method": "GET", "resource": "gadgets"}
        ]"#,
        );
        let filters = PlanFilters {
            resources: vec!["gadgets".to_string()],
            ..Default::default()
        };
        let plan = Planner::new(Blacklist::default(), filters)
            .build(&catalog, &[], RunMode::Readonly)
            .unwrap();
        assert_eq!(ids(&plan), vec!["GET /gadgets"]);
    }

    #[test]
    fn test_empty_catalog_is_empty_plan() {
        let plan = planner().build(&Catalog::default(), &[], RunMode::Full).unwrap();
        assert!(plan.is_empty());
        assert!(plan.skipped.is_empty());
    }
}
