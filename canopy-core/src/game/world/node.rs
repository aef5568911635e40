use std::{collections::HashSet, ops::ControlFlow};

use tracing::debug;

use super::World;
use crate::game::entity::{Entity, HierarchyError, ObjectKey, ObjectNode, validate_name};

impl World {
    /// 在 `parent`（默认根对象）下创建一个不带组件的对象。
    pub fn create_object(
        &mut self,
        name: impl Into<String>,
        parent: Option<Entity>,
    ) -> anyhow::Result<Entity> {
        let name = name.into();
        validate_name(&name)?;
        let parent_key = match parent {
            Some(parent) => self.object_key(parent)?,
            None => self.root_key(),
        };
        self.ensure_not_destroying(parent_key)?;

        let key = self.objects.insert(ObjectNode::new(name, true));
        self.link(key, parent_key);
        debug!(target: "canopy-core", entity = %self.entity(key), "object created");
        self.refresh_activation(key)?;
        Ok(self.entity(key))
    }

    /// 创建游离（或挂在游离子树下）的节点，不触发激活级联。
    pub(crate) fn spawn_detached(
        &mut self,
        name: String,
        self_active: bool,
        parent: Option<ObjectKey>,
    ) -> anyhow::Result<ObjectKey> {
        validate_name(&name)?;
        let key = self.objects.insert(ObjectNode::new(name, self_active));
        if let Some(parent) = parent {
            self.link(key, parent);
        }
        Ok(key)
    }

    /// 把 `child` 挂到 `parent` 下，等价于 `change_parent(child, Some(parent))`。
    pub fn add_child(&mut self, parent: Entity, child: Entity) -> anyhow::Result<()> {
        self.change_parent(child, Some(parent))
    }

    /// 修改父节点（`None` 表示根对象），并对子树重新计算激活状态。
    ///
    /// 拒绝跨运行时的句柄、移动根对象、自我挂载以及会形成环的挂载。
    pub fn change_parent(&mut self, child: Entity, parent: Option<Entity>) -> anyhow::Result<()> {
        let child_key = self.object_key(child)?;
        if child_key == self.root_key() {
            return Err(HierarchyError::RootImmutable.into());
        }
        let parent_key = match parent {
            Some(parent) => self.object_key(parent)?,
            None => self.root_key(),
        };
        if parent_key == child_key {
            return Err(HierarchyError::SelfAttachment(child).into());
        }
        self.ensure_not_destroying(child_key)?;
        self.ensure_not_destroying(parent_key)?;

        if self.is_ancestor(child_key, parent_key)? {
            return Err(HierarchyError::HierarchyCycle {
                ancestor: child,
                descendant: self.entity(parent_key),
            }
            .into());
        }

        if self
            .objects
            .get(child_key)
            .is_some_and(|node| node.parent == Some(parent_key))
        {
            return Ok(());
        }

        self.unlink(child_key);
        self.link(child_key, parent_key);
        debug!(
            target: "canopy-core",
            entity = %child,
            parent = %self.entity(parent_key),
            "object reparented"
        );
        self.refresh_activation(child_key)
    }

    /// 设置对象自身的激活标志。值未变化时不触发任何钩子。
    pub fn set_self_active(&mut self, entity: Entity, active: bool) -> anyhow::Result<()> {
        let key = self.object_key(entity)?;
        if key == self.root_key() {
            if active {
                return Ok(());
            }
            return Err(HierarchyError::RootImmutable.into());
        }
        let Some(node) = self.objects.get_mut(key) else {
            return Ok(());
        };
        if node.self_active == active {
            return Ok(());
        }
        node.self_active = active;
        debug!(target: "canopy-core", entity = %entity, active, "object self_active changed");
        self.refresh_activation(key)
    }

    /// 销毁对象及其全部后代与组件（后序：先子节点，再自身组件）。
    ///
    /// 对已销毁的句柄是空操作；根对象不能被销毁。
    pub fn destroy_object(&mut self, entity: Entity) -> anyhow::Result<()> {
        let key = match self.object_key(entity) {
            Ok(key) => key,
            Err(HierarchyError::ObjectDestroyed(_)) => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        if key == self.root_key() {
            return Err(HierarchyError::RootImmutable.into());
        }
        self.destroy_subtree(key)
    }

    /// 从根（或游离子树的顶端）到该对象的名称路径，以 `/` 分隔。
    pub fn path(&self, entity: Entity) -> Result<String, HierarchyError> {
        let key = self.object_key(entity)?;
        let mut segments = Vec::new();
        self.walk_ancestor_chain::<(), _>(Some(key), key, |_, node| {
            segments.push(node.name.clone());
            ControlFlow::Continue(node.parent)
        })?;
        segments.reverse();
        Ok(segments.join("/"))
    }

    /// 按名称查找直接子节点。
    pub fn find_child(&self, parent: Entity, name: &str) -> Option<Entity> {
        let key = self.object_key(parent).ok()?;
        self.objects
            .get(key)?
            .children
            .iter()
            .copied()
            .find(|child| self.objects.get(*child).is_some_and(|node| node.name == name))
            .map(|child| self.entity(child))
    }

    /// 重新计算 `key` 的激活状态；状态变化时同步其组件并继续处理子节点（前序）。
    pub(crate) fn refresh_activation(&mut self, key: ObjectKey) -> anyhow::Result<()> {
        let mut pending = vec![key];
        while let Some(key) = pending.pop() {
            let Some(node) = self.objects.get(key) else {
                continue;
            };
            let active = self.compute_active(key);
            if node.active_in_hierarchy == active {
                continue;
            }
            if let Some(node) = self.objects.get_mut(key) {
                node.active_in_hierarchy = active;
            }

            let components = self
                .objects
                .get(key)
                .map(|node| node.components.clone())
                .unwrap_or_default();
            for component in components {
                self.sync_component(component)?;
            }

            if let Some(node) = self.objects.get(key) {
                pending.extend(node.children.iter().rev().copied());
            }
        }
        Ok(())
    }

    fn compute_active(&self, key: ObjectKey) -> bool {
        if key == self.root_key() {
            return true;
        }
        let Some(node) = self.objects.get(key) else {
            return false;
        };
        node.self_active
            && node
                .parent
                .and_then(|parent| self.objects.get(parent))
                .is_some_and(|parent| parent.active_in_hierarchy)
    }

    fn destroy_subtree(&mut self, key: ObjectKey) -> anyhow::Result<()> {
        let mut pending = vec![Teardown::Enter(key)];
        while let Some(step) = pending.pop() {
            match step {
                Teardown::Enter(key) => {
                    let Some(node) = self.objects.get_mut(key) else {
                        continue;
                    };
                    if node.destroying {
                        continue;
                    }
                    node.destroying = true;
                    debug!(target: "canopy-core", entity = %self.entity(key), "destroying object");

                    pending.push(Teardown::Exit(key));
                    if let Some(node) = self.objects.get(key) {
                        pending.extend(
                            node.children
                                .iter()
                                .rev()
                                .map(|child| Teardown::Enter(*child)),
                        );
                    }
                }
                Teardown::Exit(key) => {
                    let components = self
                        .objects
                        .get(key)
                        .map(|node| node.components.clone())
                        .unwrap_or_default();
                    for component in components {
                        self.destroy_component_key(component)?;
                    }
                    self.unlink(key);
                    self.objects.remove(key);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn ensure_not_destroying(&self, key: ObjectKey) -> Result<(), HierarchyError> {
        match self.objects.get(key) {
            Some(node) if !node.destroying => Ok(()),
            _ => Err(HierarchyError::ObjectDestroyed(self.entity(key))),
        }
    }

    /// `ancestor` 是否位于 `key` 的祖先链上（含自身）。
    fn is_ancestor(&self, ancestor: ObjectKey, key: ObjectKey) -> Result<bool, HierarchyError> {
        let found = self.walk_ancestor_chain(Some(key), key, |id, node| {
            if id == ancestor {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(node.parent)
            }
        })?;
        Ok(found.is_some())
    }

    fn walk_ancestor_chain<R, F>(
        &self,
        start: Option<ObjectKey>,
        descendant: ObjectKey,
        mut step: F,
    ) -> Result<Option<R>, HierarchyError>
    where
        F: FnMut(ObjectKey, &ObjectNode) -> ControlFlow<R, Option<ObjectKey>>,
    {
        let mut visited = HashSet::new();
        let mut current = start;
        while let Some(id) = current {
            if !visited.insert(id) {
                return Err(HierarchyError::HierarchyCycle {
                    ancestor: self.entity(id),
                    descendant: self.entity(descendant),
                });
            }
            let Some(node) = self.objects.get(id) else {
                return Err(HierarchyError::ObjectDestroyed(self.entity(id)));
            };
            match step(id, node) {
                ControlFlow::Break(result) => return Ok(Some(result)),
                ControlFlow::Continue(next) => current = next,
            }
        }
        Ok(None)
    }

    fn link(&mut self, child: ObjectKey, parent: ObjectKey) {
        if let Some(node) = self.objects.get_mut(parent) {
            node.children.push(child);
        }
        if let Some(node) = self.objects.get_mut(child) {
            node.parent = Some(parent);
        }
    }

    fn unlink(&mut self, child: ObjectKey) {
        let Some(parent) = self.objects.get_mut(child).and_then(|node| node.parent.take()) else {
            return;
        };
        if let Some(node) = self.objects.get_mut(parent) {
            node.children.retain(|key| *key != child);
        }
    }
}

/// 后序销毁的工作项：先进入（标记并展开子节点），子节点全部完成后退出（销毁自身组件）。
#[derive(Clone, Copy)]
enum Teardown {
    Enter(ObjectKey),
    Exit(ObjectKey),
}
