//! `ls`/`dir` aggregation across stages, and the `ls_exists` shortcut.

use crate::stage::{DirCtx, LsCtx, MethodDescriptor, Stage};

/// Polls every stage's `ls` at `path` and returns the union of child
/// names, deduplicated and in first-seen order.
pub fn ls_result(stages: &mut [Box<dyn Stage>], path: &str) -> Vec<String> {
    let ctx = LsCtx { path };
    let mut seen = Vec::new();
    for stage in stages {
        for name in stage.ls(&ctx) {
            if !seen.contains(&name) {
                seen.push(name);
            }
        }
    }
    seen
}

/// Polls every stage's `dir` at `path` and returns the union of method
/// descriptors, deduplicated by name (first stage to name one wins).
pub fn dir_result(stages: &mut [Box<dyn Stage>], path: &str) -> Vec<MethodDescriptor> {
    let ctx = DirCtx { path };
    let mut seen = Vec::new();
    for stage in stages {
        for m in stage.dir(&ctx) {
            if !seen.iter().any(|existing: &MethodDescriptor| existing.name == m.name) {
                seen.push(m);
            }
        }
    }
    seen
}

/// Whether `name` exists as a child of `path`, short-circuiting the first
/// stage that reports it instead of building the full `ls_result` list.
pub fn ls_exists(stages: &mut [Box<dyn Stage>], path: &str, name: &str) -> bool {
    let ctx = LsCtx { path };
    stages.iter_mut().any(|stage| stage.ls(&ctx).iter().any(|n| n == name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{MsgCtx, Signature, StageResult};
    use shv_value::AccessLevel;
    use std::io;

    struct FixedStage {
        children: Vec<&'static str>,
        methods: Vec<&'static str>,
    }

    impl Stage for FixedStage {
        fn msg(&mut self, _ctx: &mut MsgCtx<'_>) -> io::Result<StageResult> {
            Ok(StageResult::NotHandled)
        }

        fn ls(&mut self, _ctx: &LsCtx<'_>) -> Vec<String> {
            self.children.iter().map(|s| s.to_string()).collect()
        }

        fn dir(&mut self, _ctx: &DirCtx<'_>) -> Vec<MethodDescriptor> {
            self.methods
                .iter()
                .map(|m| MethodDescriptor::new(*m, Signature::VoidVoid, AccessLevel::Browse))
                .collect()
        }
    }

    #[test]
    fn ls_result_dedups_across_stages() {
        let mut stages: Vec<Box<dyn Stage>> = vec![
            Box::new(FixedStage { children: vec!["a", "b"], methods: vec![] }),
            Box::new(FixedStage { children: vec!["b", "c"], methods: vec![] }),
        ];
        assert_eq!(ls_result(&mut stages, "/"), vec!["a", "b", "c"]);
    }

    #[test]
    fn dir_result_dedups_by_name() {
        let mut stages: Vec<Box<dyn Stage>> = vec![
            Box::new(FixedStage { children: vec![], methods: vec!["get", "set"] }),
            Box::new(FixedStage { children: vec![], methods: vec!["get"] }),
        ];
        let methods = dir_result(&mut stages, "/");
        assert_eq!(methods.len(), 2);
    }

    #[test]
    fn ls_exists_short_circuits() {
        let mut stages: Vec<Box<dyn Stage>> =
            vec![Box::new(FixedStage { children: vec!["only"], methods: vec![] })];
        assert!(ls_exists(&mut stages, "/", "only"));
        assert!(!ls_exists(&mut stages, "/", "missing"));
    }
}
