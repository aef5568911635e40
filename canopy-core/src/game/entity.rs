use std::fmt;

use slotmap::new_key_type;
use thiserror::Error;
use uuid::Uuid;

use super::component::ComponentKey;

new_key_type! {
    /// 对象在运行时对象表中的键。
    pub struct ObjectKey;
}

/// 运行时实例标识。每个 [`World`](super::World) 创建时生成一个新的随机 ID，
/// 它签发的所有句柄都携带该 ID，用于拒绝跨实例操作。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorldId(Uuid);

impl WorldId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// 场景树中对象的句柄。
///
/// `Entity` 只是一个可复制的键：对象的数据由签发它的 [`World`](super::World) 持有，
/// 对象被销毁后句柄会失效，相关查询返回 `None` 或错误。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Entity {
    world: WorldId,
    key: ObjectKey,
}

impl Entity {
    pub(crate) fn new(world: WorldId, key: ObjectKey) -> Self {
        Self { world, key }
    }

    /// 签发该句柄的运行时 ID。
    pub fn world_id(&self) -> WorldId {
        self.world
    }

    pub(crate) fn key(&self) -> ObjectKey {
        self.key
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.key)
    }
}

/// 对象节点：树结构、激活标志与挂载的组件列表。
#[derive(Debug)]
pub(crate) struct ObjectNode {
    pub(crate) name: String,
    pub(crate) parent: Option<ObjectKey>,
    pub(crate) children: Vec<ObjectKey>,
    pub(crate) self_active: bool,
    pub(crate) active_in_hierarchy: bool,
    pub(crate) components: Vec<ComponentKey>,
    pub(crate) destroying: bool,
}

impl ObjectNode {
    pub(crate) fn new(name: String, self_active: bool) -> Self {
        Self {
            name,
            parent: None,
            children: Vec::new(),
            self_active,
            active_in_hierarchy: false,
            components: Vec::new(),
            destroying: false,
        }
    }
}

/// 校验节点名称。
///
/// 名称约束如下：
/// - 不能为空字符串；
/// - 不得包含空白字符；
/// - 不得包含字符 `/`。
pub fn validate_name(name: &str) -> Result<(), NodeNameError> {
    if name.is_empty() {
        return Err(NodeNameError::Empty);
    }
    if name.contains('/') {
        return Err(NodeNameError::ContainsSlash);
    }
    if name.chars().any(char::is_whitespace) {
        return Err(NodeNameError::ContainsWhitespace);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum NodeNameError {
    #[error("节点名称不能为空")]
    Empty,
    #[error("节点名称不能包含 '/'")]
    ContainsSlash,
    #[error("节点名称不能包含空白字符")]
    ContainsWhitespace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HierarchyError {
    #[error("实体 {entity} 不属于运行时 {world}")]
    ForeignWorld { entity: Entity, world: WorldId },
    #[error("实体 {0} 已被销毁")]
    ObjectDestroyed(Entity),
    #[error("根对象不能被移动、停用或销毁")]
    RootImmutable,
    #[error("实体 {0} 不能成为自己的子节点")]
    SelfAttachment(Entity),
    #[error("检测到层级循环：实体 {ancestor} 是实体 {descendant} 的祖先")]
    HierarchyCycle { ancestor: Entity, descendant: Entity },
}
