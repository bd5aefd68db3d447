//! 扫描器注册表
//!
//! 启动时显式注册全部扫描器定义（没有目录扫描、没有动态加载），
//! 之后 `resolve` 把调用方的选择展开成有序扫描列车：
//! - 依赖闭包：被依赖的扫描器强制启用
//! - 升序稳定排序：`order` 相同时保持注册顺序
//! - 分组开关：选中分组启用其默认开启成员，默认关闭成员除非
//!   显式指定否则保持关闭；调用方的显式设置总是优先

use crate::error::{AppError, Result};
use crate::models::ScannerDefinition;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// 调用方的扫描器选择
///
/// `explicit` 记录逐个扫描器的开/关；`groups` 记录选中的分组；
/// `use_defaults` 控制是否以"全部默认开启的扫描器"为基础集合。
#[derive(Debug, Clone, Default)]
pub struct Selection {
    explicit: BTreeMap<String, bool>,
    groups: BTreeSet<String>,
    use_defaults: bool,
}

impl Selection {
    /// 空选择：只扫显式启用的
    pub fn empty() -> Self {
        Self::default()
    }

    /// 默认选择：全部默认开启的扫描器
    pub fn defaults() -> Self {
        Self {
            use_defaults: true,
            ..Self::default()
        }
    }

    pub fn enable(mut self, name: impl Into<String>) -> Self {
        self.explicit.insert(name.into(), true);
        self
    }

    pub fn disable(mut self, name: impl Into<String>) -> Self {
        self.explicit.insert(name.into(), false);
        self
    }

    /// 选中一个分组
    pub fn select_group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(group.into());
        self
    }
}

/// 扫描器注册表
pub struct ScannerRegistry {
    /// 注册顺序保存的定义表
    defs: Vec<Arc<ScannerDefinition>>,
    by_name: HashMap<&'static str, usize>,
}

impl ScannerRegistry {
    pub fn new() -> Self {
        Self {
            defs: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// 从定义序列构建注册表（启动期调用，重名即失败）
    pub fn with_definitions(
        definitions: impl IntoIterator<Item = ScannerDefinition>,
    ) -> Result<Self> {
        let mut registry = Self::new();
        for def in definitions {
            registry.register(def)?;
        }
        Ok(registry)
    }

    /// 注册一个扫描器定义
    ///
    /// # 错误
    ///
    /// 重复名称返回 `Config` 错误（启动期致命）。
    pub fn register(&mut self, def: ScannerDefinition) -> Result<()> {
        if self.by_name.contains_key(def.name) {
            return Err(AppError::config_error(format!(
                "duplicate scanner definition '{}'",
                def.name
            )));
        }
        self.by_name.insert(def.name, self.defs.len());
        self.defs.push(Arc::new(def));
        Ok(())
    }

    /// 按名查定义
    pub fn get(&self, name: &str) -> Option<&Arc<ScannerDefinition>> {
        self.by_name.get(name).map(|&i| &self.defs[i])
    }

    /// 全部已注册定义（注册顺序）
    pub fn definitions(&self) -> &[Arc<ScannerDefinition>] {
        &self.defs
    }

    /// 把选择展开成有序扫描列车
    ///
    /// 纯函数：除返回值外没有副作用。
    ///
    /// # 错误
    ///
    /// 选中或被依赖的名称未注册、分组未知时返回 `Config` 错误。
    pub fn resolve(&self, selection: &Selection) -> Result<Vec<Arc<ScannerDefinition>>> {
        // 显式名称必须全部已注册
        for name in selection.explicit.keys() {
            if !self.by_name.contains_key(name.as_str()) {
                return Err(AppError::config_error(format!(
                    "unknown scanner '{}' in selection",
                    name
                )));
            }
        }

        let known_groups: HashSet<&str> =
            self.defs.iter().filter_map(|d| d.group).collect();
        for group in &selection.groups {
            if !known_groups.contains(group.as_str()) {
                return Err(AppError::config_error(format!(
                    "unknown scanner group '{}'",
                    group
                )));
            }
        }

        let mut enabled: HashSet<&'static str> = HashSet::new();

        // 基础集合：默认开启的扫描器
        if selection.use_defaults {
            for def in &self.defs {
                if def.default_on {
                    enabled.insert(def.name);
                }
            }
        }

        // 分组选择：启用默认开启成员；默认关闭成员留给显式设置
        for def in &self.defs {
            let Some(group) = def.group else { continue };
            if !selection.groups.contains(group) {
                continue;
            }
            if selection.explicit.contains_key(def.name) {
                continue; // 调用方的值稍后统一应用
            }
            if def.default_on {
                enabled.insert(def.name);
            }
        }

        // 显式设置总是优先
        for (name, on) in &selection.explicit {
            let def = &self.defs[self.by_name[name.as_str()]];
            if *on {
                enabled.insert(def.name);
            } else {
                enabled.remove(def.name);
            }
        }

        // 依赖闭包：被依赖者强制启用
        let mut worklist: Vec<&'static str> = enabled.iter().copied().collect();
        while let Some(name) = worklist.pop() {
            let def = &self.defs[self.by_name[name]];
            for dep in def.depends {
                let Some(&dep_idx) = self.by_name.get(dep) else {
                    return Err(AppError::config_error(format!(
                        "scanner '{}' depends on unknown scanner '{}'",
                        name, dep
                    )));
                };
                if enabled.insert(self.defs[dep_idx].name) {
                    worklist.push(self.defs[dep_idx].name);
                }
            }
        }

        // 注册顺序 + 稳定排序 => order 相同时保持注册顺序
        let mut train: Vec<Arc<ScannerDefinition>> = self
            .defs
            .iter()
            .filter(|d| enabled.contains(d.name))
            .cloned()
            .collect();
        train.sort_by_key(|d| d.order);

        debug!(
            train = ?train.iter().map(|d| d.name).collect::<Vec<_>>(),
            "resolved scanner train"
        );
        Ok(train)
    }
}

impl Default for ScannerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanners::ScanInstance;
    use crate::vfs::VirtualAddress;

    struct NoopInstance;

    impl ScanInstance for NoopInstance {
        fn process(
            &mut self,
            _chunk: &crate::scanners::ScanChunk<'_>,
            _meta: &mut crate::scanners::ChunkMeta,
            _ctx: &crate::pipeline::ScanContext,
        ) -> crate::error::Result<()> {
            Ok(())
        }

        fn finish(&mut self, _ctx: &mut crate::pipeline::FinishContext<'_>) -> crate::error::Result<()> {
            Ok(())
        }
    }

    fn noop_build(_addr: &VirtualAddress) -> Box<dyn ScanInstance> {
        Box::new(NoopInstance)
    }

    fn def(
        name: &'static str,
        order: u32,
        default_on: bool,
        depends: &'static [&'static str],
        group: Option<&'static str>,
    ) -> ScannerDefinition {
        ScannerDefinition {
            name,
            order,
            default_on,
            depends,
            group,
            build: noop_build,
        }
    }

    fn names(train: &[Arc<ScannerDefinition>]) -> Vec<&'static str> {
        train.iter().map(|d| d.name).collect()
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = ScannerRegistry::new();
        registry.register(def("a", 1, true, &[], None)).unwrap();
        let err = registry.register(def("a", 2, true, &[], None)).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_resolve_sorts_by_order_stably() {
        let registry = ScannerRegistry::with_definitions([
            def("late", 30, true, &[], None),
            def("first-registered", 10, true, &[], None),
            def("tied-with-first", 10, true, &[], None),
        ])
        .unwrap();

        let train = registry.resolve(&Selection::defaults()).unwrap();
        assert_eq!(
            names(&train),
            vec!["first-registered", "tied-with-first", "late"]
        );
    }

    #[test]
    fn test_dependency_closure_is_transitive() {
        let registry = ScannerRegistry::with_definitions([
            def("a", 10, false, &[], None),
            def("b", 20, false, &["a"], None),
            def("c", 30, false, &["b"], None),
        ])
        .unwrap();

        let train = registry
            .resolve(&Selection::empty().enable("c"))
            .unwrap();
        assert_eq!(names(&train), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_dependency_appears_before_dependent() {
        let registry = ScannerRegistry::with_definitions([
            def("zip", 30, true, &["type"], None),
            def("type", 10, true, &[], None),
        ])
        .unwrap();

        let train = registry.resolve(&Selection::defaults()).unwrap();
        let type_pos = train.iter().position(|d| d.name == "type").unwrap();
        let zip_pos = train.iter().position(|d| d.name == "zip").unwrap();
        assert!(type_pos < zip_pos);
    }

    #[test]
    fn test_unknown_selection_name() {
        let registry =
            ScannerRegistry::with_definitions([def("a", 1, true, &[], None)]).unwrap();
        let err = registry
            .resolve(&Selection::empty().enable("missing"))
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_unknown_dependency() {
        let registry =
            ScannerRegistry::with_definitions([def("a", 1, true, &["ghost"], None)]).unwrap();
        let err = registry.resolve(&Selection::defaults()).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_group_enables_default_on_members_only() {
        let registry = ScannerRegistry::with_definitions([
            def("x", 10, true, &[], Some("net")),
            def("y", 20, false, &[], Some("net")),
            def("z", 30, true, &[], Some("net")),
        ])
        .unwrap();

        let train = registry
            .resolve(&Selection::empty().select_group("net"))
            .unwrap();
        assert_eq!(names(&train), vec!["x", "z"]);
    }

    #[test]
    fn test_group_respects_explicit_override() {
        let registry = ScannerRegistry::with_definitions([
            def("x", 10, true, &[], Some("net")),
            def("y", 20, false, &[], Some("net")),
            def("z", 30, true, &[], Some("net")),
        ])
        .unwrap();

        // 显式打开默认关闭的成员
        let train = registry
            .resolve(&Selection::empty().select_group("net").enable("y"))
            .unwrap();
        assert_eq!(names(&train), vec!["x", "y", "z"]);

        // 显式关闭默认开启的成员
        let train = registry
            .resolve(&Selection::empty().select_group("net").disable("z"))
            .unwrap();
        assert_eq!(names(&train), vec!["x"]);
    }

    #[test]
    fn test_unknown_group() {
        let registry =
            ScannerRegistry::with_definitions([def("a", 1, true, &[], Some("g"))]).unwrap();
        let err = registry
            .resolve(&Selection::empty().select_group("nope"))
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_dependency_forced_even_if_default_off() {
        let registry = ScannerRegistry::with_definitions([
            def("base", 10, false, &[], None),
            def("user", 20, true, &["base"], None),
        ])
        .unwrap();

        let train = registry.resolve(&Selection::defaults()).unwrap();
        assert_eq!(names(&train), vec!["base", "user"]);
    }
}
