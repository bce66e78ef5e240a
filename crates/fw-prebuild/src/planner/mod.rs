use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{Error, Result};

pub type TaskId = String;

/// Packaging targets that consume the filesystem image contents.
pub const PACKAGING_TARGETS: &[&str] = &["buildfs", "uploadfs", "uploadfsota"];

#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub label: String,
    pub module: String,
    pub phase: String,
    pub after: Vec<TaskId>,
    pub provides: Vec<String>,
    /// Orchestrator targets this hook runs before. Empty means every build.
    pub targets: Vec<String>,
}

impl Task {
    pub fn applies_to(&self, target: Option<&str>) -> bool {
        if self.targets.is_empty() {
            return true;
        }
        match target {
            Some(t) => self.targets.iter().any(|x| x == t),
            None => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct Plan {
    tasks: BTreeMap<TaskId, Task>,
}

impl Plan {
    pub fn add(&mut self, task: Task) -> Result<()> {
        if self.tasks.contains_key(&task.id) {
            return Err(Error::msg(format!("duplicate task id '{}'", task.id)));
        }
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Every target some hook is attached to, sorted.
    pub fn targets(&self) -> Vec<&str> {
        let set: BTreeSet<&str> = self
            .tasks
            .values()
            .flat_map(|t| t.targets.iter().map(String::as_str))
            .collect();
        set.into_iter().collect()
    }

    fn provides_index(&self) -> Result<BTreeMap<&str, &str>> {
        let mut out: BTreeMap<&str, &str> = BTreeMap::new();
        for (id, task) in &self.tasks {
            for p in &task.provides {
                if let Some(existing) = out.insert(p.as_str(), id.as_str()) {
                    return Err(Error::msg(format!(
                        "provide token '{}' is produced by both '{}' and '{}'",
                        p, existing, id
                    )));
                }
            }
        }
        Ok(out)
    }

    // Deps ending in '?' may be absent (module disabled or not configured).
    fn resolve_dep<'a>(
        &'a self,
        provides: &BTreeMap<&'a str, &'a str>,
        dep: &'a str,
    ) -> Result<Option<&'a str>> {
        let (dep, optional) = dep
            .strip_suffix('?')
            .map(|d| (d, true))
            .unwrap_or((dep, false));
        if self.tasks.contains_key(dep) {
            return Ok(Some(dep));
        }
        if let Some(&provider) = provides.get(dep) {
            return Ok(Some(provider));
        }
        if optional {
            Ok(None)
        } else {
            Err(Error::msg(format!("unknown dependency '{}'", dep)))
        }
    }

    pub fn ordered(&self) -> Result<Vec<&Task>> {
        let provides = self.provides_index()?;

        let mut incoming: BTreeMap<&str, usize> = BTreeMap::new();
        let mut outgoing: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

        for (id, task) in &self.tasks {
            incoming.entry(id.as_str()).or_insert(0);
            outgoing.entry(id.as_str()).or_default();
            for dep in &task.after {
                let Some(dep_id) = self.resolve_dep(&provides, dep.as_str()).map_err(|e| {
                    Error::msg(format!(
                        "task '{}' has invalid dependency '{}': {}",
                        id, dep, e
                    ))
                })?
                else {
                    continue;
                };
                if outgoing.entry(dep_id).or_default().insert(id.as_str()) {
                    *incoming.entry(id.as_str()).or_insert(0) += 1;
                }
            }
        }

        let mut q: VecDeque<&str> = incoming
            .iter()
            .filter_map(|(k, v)| (*v == 0).then_some(*k))
            .collect();
        let mut out: Vec<&Task> = Vec::with_capacity(self.tasks.len());

        while let Some(n) = q.pop_front() {
            if let Some(task) = self.tasks.get(n) {
                out.push(task);
            }
            if let Some(children) = outgoing.get(n) {
                for &m in children {
                    if let Some(slot) = incoming.get_mut(m) {
                        *slot -= 1;
                        if *slot == 0 {
                            q.push_back(m);
                        }
                    }
                }
            }
        }

        if out.len() != self.tasks.len() {
            let remaining: Vec<&str> = incoming
                .iter()
                .filter_map(|(k, v)| (*v > 0).then_some(*k))
                .collect();
            return Err(Error::msg(format!(
                "task graph contains a cycle; remaining nodes: {}",
                remaining.join(", ")
            )));
        }

        Ok(out)
    }

    /// Ordered hooks that run for `target` (`None`: plain pre-build).
    pub fn ordered_for(&self, target: Option<&str>) -> Result<Vec<&Task>> {
        Ok(self
            .ordered()?
            .into_iter()
            .filter(|t| t.applies_to(target))
            .collect())
    }

    pub fn to_dot(&self) -> Result<String> {
        let provides = self.provides_index()?;

        let mut out = String::from("digraph plan {\n  rankdir=LR;\n");
        for task in self.tasks.values() {
            let scope = if task.targets.is_empty() {
                "always".to_string()
            } else {
                task.targets.join(",")
            };
            out.push_str(&format!(
                "  \"{}\" [label=\"{}\\n{}:{}\\n[{}]\"];\n",
                task.id, task.label, task.module, task.phase, scope
            ));
        }
        for task in self.tasks.values() {
            for dep in &task.after {
                let Some(dep_id) = self.resolve_dep(&provides, dep.as_str())? else {
                    continue;
                };
                out.push_str(&format!("  \"{}\" -> \"{}\";\n", dep_id, task.id));
            }
        }
        out.push_str("}\n");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, after: &[&str], provides: &[&str], targets: &[&str]) -> Task {
        Task {
            id: id.into(),
            label: id.into(),
            module: id.split('.').next().unwrap_or(id).into(),
            phase: "test".into(),
            after: after.iter().map(|s| s.to_string()).collect(),
            provides: provides.iter().map(|s| s.to_string()).collect(),
            targets: targets.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn orders_by_tokens_and_filters_by_target() {
        let mut plan = Plan::default();
        plan.add(task("core.init", &[], &["core:initialized"], &[]))
            .unwrap();
        plan.add(task("assets.minify", &["core:initialized", "headers:patched?"], &[], &["buildfs"]))
            .unwrap();
        plan.add(task("headers.patch", &["core.init"], &["headers:patched"], &[]))
            .unwrap();

        let ids: Vec<&str> = plan
            .ordered_for(Some("buildfs"))
            .unwrap()
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(ids, vec!["core.init", "headers.patch", "assets.minify"]);

        let prebuild: Vec<&str> = plan
            .ordered_for(None)
            .unwrap()
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(prebuild, vec!["core.init", "headers.patch"]);
        assert_eq!(plan.targets(), vec!["buildfs"]);
    }

    #[test]
    fn rejects_unknown_required_dependency() {
        let mut plan = Plan::default();
        plan.add(task("assets.minify", &["nope"], &[], &[])).unwrap();
        let err = plan.ordered().unwrap_err().to_string();
        assert!(err.contains("unknown dependency 'nope'"), "unexpected err: {err}");
    }

    #[test]
    fn detects_cycles() {
        let mut plan = Plan::default();
        plan.add(task("a.one", &["b.two"], &[], &[])).unwrap();
        plan.add(task("b.two", &["a.one"], &[], &[])).unwrap();
        let err = plan.ordered().unwrap_err().to_string();
        assert!(err.contains("cycle"), "unexpected err: {err}");
    }
}
