use super::decode::Untransform;
use super::encode::{Substitution, Transform};
use super::error::GraphError;
use super::value::GraphValue;

#[derive(Debug, Clone)]
struct Handle {
    kind: String,
    name: String,
    resource: GraphValue,
}

/// Named resources that travel by name instead of by content.
///
/// Used as a transform, a registered resource (matched by identity) is
/// encoded as `{"name": …}` tagged with its kind. Used as an untransform,
/// that tag and name resolve back to the registered instance. Nodes tagged
/// with a kind the registry has never seen pass through untouched.
///
/// ```
/// use quadplay_format::{deserialize, serialize, GraphValue, HandleRegistry};
///
/// let font = GraphValue::array(vec![GraphValue::from("glyphs")]);
/// let mut registry = HandleRegistry::new();
/// registry.register("font", "deja", font.clone());
///
/// let text = serialize(&font, Some(&mut registry.clone())).unwrap();
/// assert!(!text.contains("glyphs"));
///
/// let decoded = deserialize(&text, Some(&mut registry)).unwrap();
/// assert!(decoded.same(&font));
/// ```
#[derive(Debug, Clone, Default)]
pub struct HandleRegistry {
    handles: Vec<Handle>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `resource` under `kind` and `name`, replacing any previous
    /// resource with the same kind and name.
    pub fn register(&mut self, kind: impl Into<String>, name: impl Into<String>, resource: GraphValue) {
        let (kind, name) = (kind.into(), name.into());
        self.handles.retain(|h| h.kind != kind || h.name != name);
        self.handles.push(Handle { kind, name, resource });
    }

    pub fn resolve(&self, kind: &str, name: &str) -> Option<&GraphValue> {
        self.handles
            .iter()
            .find(|h| h.kind == kind && h.name == name)
            .map(|h| &h.resource)
    }

    /// Kind and name under which `resource` is registered.
    pub fn handle_of(&self, resource: &GraphValue) -> Option<(&str, &str)> {
        self.handles
            .iter()
            .find(|h| h.resource.same(resource))
            .map(|h| (h.kind.as_str(), h.name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    fn knows_kind(&self, kind: &str) -> bool {
        self.handles.iter().any(|h| h.kind == kind)
    }
}

impl Transform for HandleRegistry {
    fn transform(&mut self, value: &GraphValue) -> Option<Substitution> {
        let (kind, name) = self.handle_of(value)?;
        Some(Substitution {
            value: [("name", GraphValue::from(name))].into_iter().collect(),
            custom_type: Some(kind.to_string()),
        })
    }
}

impl Untransform for HandleRegistry {
    fn untransform(&mut self, value: GraphValue, custom_type: Option<&str>) -> Result<GraphValue, GraphError> {
        let Some(kind) = custom_type.filter(|kind| self.knows_kind(kind)) else {
            return Ok(value);
        };
        let name = value
            .member("name")
            .and_then(|name| name.as_str().map(str::to_string))
            .ok_or_else(|| GraphError::Untransform(format!("{kind} handle without a name")))?;
        self.resolve(kind, &name)
            .cloned()
            .ok_or_else(|| GraphError::Untransform(format!("no {kind} named {name:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{decode, deserialize, encode, serialize, DecodeMemory, Function, MemoizationMap};

    fn registry() -> (HandleRegistry, GraphValue, GraphValue) {
        let sheet = GraphValue::array(vec![GraphValue::from(1.0), GraphValue::from(2.0)]);
        let api = GraphValue::Function(Function::closure("draw_sprite", |_| GraphValue::Null));
        let mut registry = HandleRegistry::new();
        registry.register("spritesheet", "tiles", sheet.clone());
        registry.register("API", "draw_sprite", api.clone());
        (registry, sheet, api)
    }

    #[test]
    fn resources_travel_by_name() {
        let (mut registry, sheet, api) = registry();
        let root = GraphValue::array(vec![sheet.clone(), api.clone(), sheet.clone()]);

        let text = serialize(&root, Some(&mut registry)).unwrap();
        assert!(text.contains(r#""custom_type":"spritesheet""#));
        assert!(text.contains(r#""custom_type":"API""#));

        let decoded = deserialize(&text, Some(&mut registry)).unwrap();
        let items = decoded.as_array().unwrap().borrow().clone();
        assert!(items[0].same(&sheet));
        assert!(items[1].same(&api));
        assert!(items[2].same(&sheet));
    }

    #[test]
    fn hooks_borrowed_apart_from_memo() {
        let (registry, sheet, _) = registry();
        let root = GraphValue::array(vec![sheet.clone(), sheet.clone()]);

        let mut memo = MemoizationMap::new();
        let node = {
            let mut transform = registry.clone();
            encode(&root, &mut memo, Some(&mut transform)).unwrap()
        };
        assert_eq!(memo.len(), 2);

        let mut memory = DecodeMemory::new();
        let decoded = {
            let mut untransform = registry.clone();
            decode(&node, &mut memory, Some(&mut untransform)).unwrap()
        };
        let items = decoded.as_array().unwrap().borrow().clone();
        assert!(items[0].same(&sheet));
        assert!(items[1].same(&sheet));

        let text = serialize(&root, Some(&mut registry.clone())).unwrap();
        assert!(deserialize(&text, Some(&mut registry.clone())).unwrap().as_array().is_some());
    }

    #[test]
    fn unknown_name_is_an_error() {
        let (mut registry, sheet, _) = registry();
        let text = serialize(&sheet, Some(&mut registry)).unwrap();

        let mut other = HandleRegistry::new();
        other.register("spritesheet", "walls", GraphValue::array(vec![]));
        let err = deserialize(&text, Some(&mut other)).unwrap_err();
        assert!(matches!(err, GraphError::Untransform(_)));
    }

    #[test]
    fn foreign_kinds_pass_through() {
        let mut registry = HandleRegistry::new();
        let value = GraphValue::from("plain");
        let out = registry.untransform(value, Some("font")).unwrap();
        assert_eq!(out.as_str(), Some("plain"));
    }

    #[test]
    fn register_replaces_same_name() {
        let (mut registry, _, _) = registry();
        let replacement = GraphValue::array(vec![]);
        registry.register("spritesheet", "tiles", replacement.clone());
        assert_eq!(registry.len(), 2);
        assert!(registry.resolve("spritesheet", "tiles").unwrap().same(&replacement));
        assert_eq!(registry.handle_of(&replacement), Some(("spritesheet", "tiles")));
    }
}
