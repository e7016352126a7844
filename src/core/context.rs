// per-job composition state. one context per translation job, never shared.
use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::config::CompositionConfig;
use crate::core::consolidation::ConsolidationData;
use crate::core::graph::{flatten_node_type, GraphError, NodeTemplate, NodeType, ServiceTemplate};
use crate::core::types::{EntityKind, GLOBAL_SUBSTITUTION_TYPES_TEMPLATE_NAME};

/// Id bookkeeping for one template file.
#[derive(Debug, Clone, Default)]
pub struct UnifiedSubstitutionData {
    /// original node id -> abstract node id standing in for it
    pub(crate) abstract_ids: BTreeMap<String, String>,
    /// original node id -> id of its copy inside this substitution template
    pub(crate) local_ids: BTreeMap<String, String>,
    /// original node id of this file -> id of its copy in the substitution
    /// template that absorbed it
    pub(crate) absorbed_local_ids: BTreeMap<String, String>,
    /// original nested node id -> unified nested node id
    pub(crate) nested_node_ids: BTreeMap<String, String>,
    /// node templates removed from this file, still inspectable
    pub(crate) cleaned: BTreeMap<String, (EntityKind, NodeTemplate)>,
}

#[derive(Debug, Clone, Default)]
struct HandledNested {
    node_type: String,
    main_files: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct CompositionContext {
    pub config: CompositionConfig,
    pub consolidation_data: ConsolidationData,
    /// receives every generated substitution node type
    pub global_substitution_template: ServiceTemplate,
    /// normative/vendor types the translated templates derive from
    pub global_types: BTreeMap<String, NodeType>,
    translated_templates: BTreeMap<String, ServiceTemplate>,
    pub(crate) unified: BTreeMap<String, UnifiedSubstitutionData>,
    /// original nested node type -> unified nested node type
    pub(crate) nested_type_ids: BTreeMap<String, String>,
    /// nested template file -> its unified type and the main files that handled it
    handled_nested: BTreeMap<String, HandledNested>,
    /// unified nested type -> main template files using it, first user first
    global_type_users: BTreeMap<String, Vec<String>>,
    /// (main template file, unified nested type) -> next node template index
    nested_node_index: BTreeMap<(String, String), usize>,
}

impl CompositionContext {
    pub fn new(config: CompositionConfig, consolidation_data: ConsolidationData) -> Self {
        CompositionContext {
            config,
            consolidation_data,
            global_substitution_template: ServiceTemplate::new(GLOBAL_SUBSTITUTION_TYPES_TEMPLATE_NAME),
            global_types: BTreeMap::new(),
            translated_templates: BTreeMap::new(),
            unified: BTreeMap::new(),
            nested_type_ids: BTreeMap::new(),
            handled_nested: BTreeMap::new(),
            global_type_users: BTreeMap::new(),
            nested_node_index: BTreeMap::new(),
        }
    }

    /// Seeds the shared global substitution types template, e.g. with the nested
    /// node types an earlier translation pass produced.
    pub fn with_global_substitution_template(mut self, template: ServiceTemplate) -> Self {
        self.global_substitution_template = template;
        self
    }

    pub fn with_global_types(mut self, types: BTreeMap<String, NodeType>) -> Self {
        self.global_types = types;
        self
    }

    pub fn add_translated_template(&mut self, template: ServiceTemplate) {
        self.translated_templates.insert(template.name().to_string(), template);
    }

    pub fn translated_template(&self, name: &str) -> Option<&ServiceTemplate> {
        self.translated_templates.get(name)
    }

    /// Generated substitution templates, for the packaging layer.
    pub fn translated_templates(&self) -> impl Iterator<Item = &ServiceTemplate> {
        self.translated_templates.values()
    }

    pub(crate) fn file_data(&self, file_name: &str) -> Option<&UnifiedSubstitutionData> {
        self.unified.get(file_name)
    }

    pub(crate) fn file_data_mut(&mut self, file_name: &str) -> &mut UnifiedSubstitutionData {
        self.unified.entry(file_name.to_string()).or_default()
    }

    pub fn cache_cleaned_node(
        &mut self,
        file_name: &str,
        node_id: &str,
        kind: EntityKind,
        node_template: NodeTemplate,
    ) {
        debug!(template = file_name, node = node_id, %kind, "caching cleaned node template");
        self.file_data_mut(file_name)
            .cleaned
            .insert(node_id.to_string(), (kind, node_template));
    }

    pub fn cleaned_node(&self, file_name: &str, node_id: &str) -> Option<&NodeTemplate> {
        self.file_data(file_name)?.cleaned.get(node_id).map(|(_, t)| t)
    }

    pub fn cleaned_kind(&self, file_name: &str, node_id: &str) -> Option<EntityKind> {
        self.file_data(file_name)?.cleaned.get(node_id).map(|(k, _)| *k)
    }

    /// Live node template, falling back to the cleaned cache.
    pub fn node_template_or_cleaned<'a>(
        &'a self,
        template: &'a ServiceTemplate,
        node_id: &str,
    ) -> Result<&'a NodeTemplate, GraphError> {
        match template.node_template(node_id) {
            Some(t) => Ok(t),
            None => self
                .cleaned_node(&template.file_name(), node_id)
                .ok_or_else(|| GraphError::NodeTemplateNotFound {
                    template: template.file_name(),
                    node: node_id.to_string(),
                }),
        }
    }

    /// Flattened node type, searching `templates` first, then the global
    /// substitution types and the global type library.
    pub fn flat_node_type(
        &self,
        type_id: &str,
        templates: &[&ServiceTemplate],
    ) -> Result<NodeType, GraphError> {
        let mut sources: Vec<&BTreeMap<String, NodeType>> =
            templates.iter().map(|t| &t.node_types).collect();
        sources.push(&self.global_substitution_template.node_types);
        sources.push(&self.global_types);
        flatten_node_type(type_id, &sources)
    }

    /// True once `nested_file` was handled for `main_file`.
    pub fn is_nested_template_handled(&self, main_file: &str, nested_file: &str) -> bool {
        self.handled_nested
            .get(nested_file)
            .is_some_and(|h| h.main_files.contains(main_file))
    }

    /// Type `nested_file` was unified to, by whichever main template got there first.
    pub fn unified_nested_type(&self, nested_file: &str) -> Option<&str> {
        self.handled_nested.get(nested_file).map(|h| h.node_type.as_str())
    }

    /// The first call for a nested file records its unified type, later ones
    /// only add the main template.
    pub fn mark_nested_template_handled(&mut self, main_file: &str, nested_file: &str, node_type: &str) {
        let handled = self
            .handled_nested
            .entry(nested_file.to_string())
            .or_insert_with(|| HandledNested { node_type: node_type.to_string(), ..Default::default() });
        handled.main_files.insert(main_file.to_string());
    }

    /// Registers `main_file` as a user of `nested_type` and returns its position
    /// among users. Position 0 keeps the bare type id.
    pub fn global_type_index(&mut self, main_file: &str, nested_type: &str) -> usize {
        let users = self.global_type_users.entry(nested_type.to_string()).or_default();
        match users.iter().position(|u| u == main_file) {
            Some(idx) => idx,
            None => {
                users.push(main_file.to_string());
                users.len() - 1
            }
        }
    }

    pub fn next_nested_node_index(&mut self, main_file: &str, nested_type: &str) -> usize {
        let slot = self
            .nested_node_index
            .entry((main_file.to_string(), nested_type.to_string()))
            .or_insert(0);
        let idx = *slot;
        *slot += 1;
        idx
    }
}
