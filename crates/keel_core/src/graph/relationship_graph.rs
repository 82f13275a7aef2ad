//! Relationship graph with inverse propagation.

use crate::error::CoreResult;
use crate::graph::edge::{Edge, Layer, Members};
use crate::graph::RecordTypes;
use crate::schema::{RelationshipDescriptor, SchemaRegistry};
use crate::types::ClientId;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::trace;

/// What the graph needs to know about records to propagate inverses.
#[derive(Clone, Copy)]
pub(crate) struct LinkContext<'a> {
    pub schema: &'a SchemaRegistry,
    pub types: &'a dyn RecordTypes,
}

impl<'a> LinkContext<'a> {
    pub fn new(schema: &'a SchemaRegistry, types: &'a dyn RecordTypes) -> Self {
        Self { schema, types }
    }

    /// Inverse of `owner_type.rel` as seen from the record it links to.
    fn inverse_toward(
        self,
        owner_type: &str,
        descriptor: &RelationshipDescriptor,
        target: ClientId,
    ) -> CoreResult<Option<RelationshipDescriptor>> {
        match self.types.type_of(target) {
            Some(target_type) => {
                self.schema.inverse_toward(owner_type, &descriptor.name, target_type)
            }
            None => self.schema.inverse_for(owner_type, &descriptor.name),
        }
    }
}

/// Every relationship edge of one store.
///
/// Edges are created lazily. Each edge keeps a current and a canonical
/// layer; every operation names the layer it applies to, and inverse
/// propagation stays on that layer. A reverse index of referrers lets a
/// record be purged from every edge that mentions it without a scan.
#[derive(Debug, Default)]
pub(crate) struct RelationshipGraph {
    edges: HashMap<ClientId, BTreeMap<String, Edge>>,
    referrers: HashMap<ClientId, BTreeSet<(ClientId, String)>>,
    /// Records whose edges changed, with the relationships whose current
    /// layer changed.
    touched: BTreeMap<ClientId, BTreeSet<String>>,
}

impl RelationshipGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edge(&self, owner: ClientId, name: &str) -> Option<&Edge> {
        self.edges.get(&owner).and_then(|edges| edges.get(name))
    }

    pub fn edge_mut(&mut self, owner: ClientId, name: &str) -> Option<&mut Edge> {
        self.edges.get_mut(&owner).and_then(|edges| edges.get_mut(name))
    }

    /// Returns the edge, creating an empty one on first access.
    pub fn ensure(&mut self, owner: ClientId, descriptor: &RelationshipDescriptor) -> &mut Edge {
        self.edges
            .entry(owner)
            .or_default()
            .entry(descriptor.name.clone())
            .or_insert_with(|| Edge::new(descriptor.kind))
    }

    /// Iterates the edges of a record.
    pub fn edges_of(&self, owner: ClientId) -> impl Iterator<Item = (&str, &Edge)> {
        self.edges
            .get(&owner)
            .into_iter()
            .flat_map(|edges| edges.iter().map(|(name, edge)| (name.as_str(), edge)))
    }

    pub fn members(&self, owner: ClientId, name: &str, layer: Layer) -> Vec<ClientId> {
        self.edge(owner, name)
            .map(|edge| edge.layer(layer).to_vec())
            .unwrap_or_default()
    }

    pub fn get_one(&self, owner: ClientId, name: &str, layer: Layer) -> Option<ClientId> {
        match self.edge(owner, name).map(|edge| edge.layer(layer)) {
            Some(Members::One(target)) => *target,
            _ => None,
        }
    }

    pub fn contains(&self, owner: ClientId, name: &str, target: ClientId, layer: Layer) -> bool {
        self.edge(owner, name)
            .is_some_and(|edge| edge.layer(layer).contains(target))
    }

    /// Records that mention `target` in any edge.
    pub fn referrers(&self, target: ClientId) -> Vec<(ClientId, String)> {
        self.referrers
            .get(&target)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drains the set of records whose edges changed.
    pub fn take_touched(&mut self) -> BTreeMap<ClientId, BTreeSet<String>> {
        std::mem::take(&mut self.touched)
    }

    fn touch(&mut self, owner: ClientId, name: &str, layer: Layer) {
        let names = self.touched.entry(owner).or_default();
        if layer == Layer::Current {
            names.insert(name.to_string());
        }
    }

    fn raw_insert(
        &mut self,
        owner: ClientId,
        descriptor: &RelationshipDescriptor,
        target: ClientId,
        layer: Layer,
    ) -> bool {
        if !self.ensure(owner, descriptor).layer_mut(layer).insert(target) {
            return false;
        }
        self.referrers
            .entry(target)
            .or_default()
            .insert((owner, descriptor.name.clone()));
        self.touch(owner, &descriptor.name, layer);
        true
    }

    fn raw_set_one(
        &mut self,
        owner: ClientId,
        descriptor: &RelationshipDescriptor,
        target: ClientId,
        layer: Layer,
    ) {
        if let Some(previous) = self.get_one(owner, &descriptor.name, layer) {
            self.raw_remove(owner, &descriptor.name, previous, layer);
        }
        self.raw_insert(owner, descriptor, target, layer);
    }

    fn raw_remove(&mut self, owner: ClientId, name: &str, target: ClientId, layer: Layer) -> bool {
        let Some(edge) = self.edge_mut(owner, name) else {
            return false;
        };
        if !edge.layer_mut(layer).remove(target) {
            return false;
        }
        if !edge.references(target) {
            if let Some(set) = self.referrers.get_mut(&target) {
                set.remove(&(owner, name.to_string()));
                if set.is_empty() {
                    self.referrers.remove(&target);
                }
            }
        }
        self.touch(owner, name, layer);
        true
    }

    /// Links `target` into `owner.rel` on one layer and mirrors the change
    /// on the inverse.
    ///
    /// A to-one relationship first releases its previous target. When the
    /// inverse is to-one, the target is first released from whoever held it.
    pub fn relate(
        &mut self,
        links: LinkContext<'_>,
        owner_type: &str,
        owner: ClientId,
        descriptor: &RelationshipDescriptor,
        target: ClientId,
        layer: Layer,
    ) -> CoreResult<()> {
        let inverse = links.inverse_toward(owner_type, descriptor, target)?;

        if descriptor.kind.is_to_one() {
            match self.get_one(owner, &descriptor.name, layer) {
                Some(previous) if previous == target => return Ok(()),
                Some(previous) => {
                    self.unrelate(links, owner_type, owner, descriptor, previous, layer)?;
                }
                None => {}
            }
        } else if self.contains(owner, &descriptor.name, target, layer) {
            return Ok(());
        }

        trace!(%owner, relationship = %descriptor.name, %target, ?layer, "relate");
        self.raw_insert(owner, descriptor, target, layer);

        if let Some(inverse) = inverse {
            if inverse.kind.is_to_one() {
                if let Some(holder) = self.get_one(target, &inverse.name, layer) {
                    if holder != owner {
                        let target_type = links
                            .types
                            .type_of(target)
                            .unwrap_or(descriptor.related_type.as_str());
                        self.unrelate(links, target_type, target, &inverse, holder, layer)?;
                    }
                }
                self.raw_set_one(target, &inverse, owner, layer);
            } else {
                self.raw_insert(target, &inverse, owner, layer);
            }
        }
        Ok(())
    }

    /// Removes `target` from `owner.rel` on one layer and from the inverse.
    pub fn unrelate(
        &mut self,
        links: LinkContext<'_>,
        owner_type: &str,
        owner: ClientId,
        descriptor: &RelationshipDescriptor,
        target: ClientId,
        layer: Layer,
    ) -> CoreResult<()> {
        let inverse = links.inverse_toward(owner_type, descriptor, target)?;
        if !self.raw_remove(owner, &descriptor.name, target, layer) {
            return Ok(());
        }

        trace!(%owner, relationship = %descriptor.name, %target, ?layer, "unrelate");
        if let Some(inverse) = inverse {
            self.raw_remove(target, &inverse.name, owner, layer);
        }
        Ok(())
    }

    /// Brings one layer of `owner.rel` to exactly `target`, propagating each
    /// individual change to the inverse. To-many order follows `target`.
    pub fn sync_layer(
        &mut self,
        links: LinkContext<'_>,
        owner_type: &str,
        owner: ClientId,
        descriptor: &RelationshipDescriptor,
        target: &Members,
        layer: Layer,
    ) -> CoreResult<()> {
        self.ensure(owner, descriptor);
        match target {
            Members::One(wanted) => {
                let present = self.get_one(owner, &descriptor.name, layer);
                match (present, *wanted) {
                    (a, b) if a == b => {}
                    (_, Some(wanted)) => {
                        self.relate(links, owner_type, owner, descriptor, wanted, layer)?;
                    }
                    (Some(present), None) => {
                        self.unrelate(links, owner_type, owner, descriptor, present, layer)?;
                    }
                    (None, None) => {}
                }
            }
            Members::Many(wanted) => {
                let present = self.members(owner, &descriptor.name, layer);
                for stale in present.iter().filter(|c| !wanted.contains(c)) {
                    self.unrelate(links, owner_type, owner, descriptor, *stale, layer)?;
                }
                for member in wanted {
                    self.relate(links, owner_type, owner, descriptor, *member, layer)?;
                }
                self.reorder(owner, &descriptor.name, wanted, layer);
            }
        }
        Ok(())
    }

    /// Reorders a to-many layer. Ignored unless `order` holds exactly the
    /// current members.
    pub fn reorder(&mut self, owner: ClientId, name: &str, order: &[ClientId], layer: Layer) {
        let Some(edge) = self.edge_mut(owner, name) else {
            return;
        };
        let wanted = Members::Many(order.to_vec());
        let members = edge.layer(layer);
        let changes = match members {
            Members::Many(present) => present.as_slice() != order && members.same_members(&wanted),
            Members::One(_) => false,
        };
        if changes {
            *edge.layer_mut(layer) = wanted;
            self.touch(owner, name, layer);
        }
    }

    /// Removes every member of every edge of `owner` on one layer, with
    /// inverse propagation, and drops `owner` from one-way edges that
    /// point at it.
    pub fn unlink(
        &mut self,
        links: LinkContext<'_>,
        owner_type: &str,
        owner: ClientId,
        layer: Layer,
    ) -> CoreResult<()> {
        let model = links.schema.model(owner_type)?;
        for descriptor in &model.relationships {
            for target in self.members(owner, &descriptor.name, layer) {
                self.unrelate(links, owner_type, owner, descriptor, target, layer)?;
            }
        }
        for (referrer, name) in self.referrers(owner) {
            self.raw_remove(referrer, &name, owner, layer);
        }
        Ok(())
    }

    /// Removes a record from the graph entirely: its own edges and every
    /// reference to it, on both layers.
    pub fn remove_record(&mut self, client_id: ClientId) {
        for (referrer, name) in self.referrers(client_id) {
            self.raw_remove(referrer, &name, client_id, Layer::Current);
            self.raw_remove(referrer, &name, client_id, Layer::Canonical);
        }
        self.referrers.remove(&client_id);

        if let Some(own) = self.edges.remove(&client_id) {
            for (name, edge) in own {
                let mut targets = edge.current.to_vec();
                targets.extend(edge.canonical.to_vec());
                for target in targets {
                    if let Some(set) = self.referrers.get_mut(&target) {
                        set.remove(&(client_id, name.clone()));
                        if set.is_empty() {
                            self.referrers.remove(&target);
                        }
                    }
                }
            }
        }
        self.touched.remove(&client_id);
    }

    /// Current-layer membership of every edge of a record.
    pub fn current_of(&self, owner: ClientId) -> BTreeMap<String, Members> {
        self.edges_of(owner)
            .map(|(name, edge)| (name.to_string(), edge.current.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ModelSchema;

    fn schema() -> SchemaRegistry {
        SchemaRegistry::new()
            .with(
                ModelSchema::new("post")
                    .relationship(RelationshipDescriptor::has_many("comments", "comment"))
                    .relationship(RelationshipDescriptor::has_many("tags", "tag")),
            )
            .unwrap()
            .with(
                ModelSchema::new("comment")
                    .relationship(RelationshipDescriptor::belongs_to("post", "post")),
            )
            .unwrap()
            .with(
                ModelSchema::new("tag")
                    .relationship(RelationshipDescriptor::has_many("posts", "post")),
            )
            .unwrap()
    }

    const POST_A: ClientId = ClientId(1);
    const POST_B: ClientId = ClientId(2);
    const COMMENT: ClientId = ClientId(3);
    const TAG: ClientId = ClientId(4);
    const VIDEO: ClientId = ClientId(5);

    struct Types(HashMap<ClientId, &'static str>);

    impl RecordTypes for Types {
        fn type_of(&self, client_id: ClientId) -> Option<&str> {
            self.0.get(&client_id).copied()
        }
    }

    fn types() -> Types {
        Types(HashMap::from([
            (POST_A, "post"),
            (POST_B, "post"),
            (COMMENT, "comment"),
            (TAG, "tag"),
            (VIDEO, "video"),
            (ClientId(10), "comment"),
            (ClientId(11), "comment"),
        ]))
    }

    fn commentables() -> SchemaRegistry {
        SchemaRegistry::new()
            .with(ModelSchema::new("commentable"))
            .unwrap()
            .with(
                ModelSchema::new("post")
                    .extends("commentable")
                    .relationship(RelationshipDescriptor::has_many("comments", "comment")),
            )
            .unwrap()
            .with(
                ModelSchema::new("video")
                    .extends("commentable")
                    .relationship(RelationshipDescriptor::has_many("remarks", "comment")),
            )
            .unwrap()
            .with(
                ModelSchema::new("comment").relationship(
                    RelationshipDescriptor::belongs_to("commentable", "commentable").polymorphic(),
                ),
            )
            .unwrap()
    }

    #[test]
    fn has_many_push_sets_belongs_to() {
        let schema = schema();
        let types = types();
        let links = LinkContext::new(&schema, &types);
        let mut graph = RelationshipGraph::new();
        let comments = schema.relationship("post", "comments").unwrap().clone();

        graph
            .relate(links, "post", POST_A, &comments, COMMENT, Layer::Current)
            .unwrap();

        assert_eq!(graph.get_one(COMMENT, "post", Layer::Current), Some(POST_A));
        assert_eq!(graph.get_one(COMMENT, "post", Layer::Canonical), None);
        assert_eq!(graph.referrers(COMMENT), vec![(POST_A, "comments".to_string())]);
    }

    #[test]
    fn reassigning_belongs_to_moves_between_has_manys() {
        let schema = schema();
        let types = types();
        let links = LinkContext::new(&schema, &types);
        let mut graph = RelationshipGraph::new();
        let post = schema.relationship("comment", "post").unwrap().clone();

        graph
            .relate(links, "comment", COMMENT, &post, POST_A, Layer::Current)
            .unwrap();
        graph
            .relate(links, "comment", COMMENT, &post, POST_B, Layer::Current)
            .unwrap();

        assert!(graph.members(POST_A, "comments", Layer::Current).is_empty());
        assert_eq!(graph.members(POST_B, "comments", Layer::Current), vec![COMMENT]);
    }

    #[test]
    fn pushing_into_other_has_many_releases_previous_owner() {
        let schema = schema();
        let types = types();
        let links = LinkContext::new(&schema, &types);
        let mut graph = RelationshipGraph::new();
        let comments = schema.relationship("post", "comments").unwrap().clone();

        graph
            .relate(links, "post", POST_A, &comments, COMMENT, Layer::Current)
            .unwrap();
        graph
            .relate(links, "post", POST_B, &comments, COMMENT, Layer::Current)
            .unwrap();

        assert!(graph.members(POST_A, "comments", Layer::Current).is_empty());
        assert_eq!(graph.get_one(COMMENT, "post", Layer::Current), Some(POST_B));
    }

    #[test]
    fn many_to_many_is_symmetric() {
        let schema = schema();
        let types = types();
        let links = LinkContext::new(&schema, &types);
        let mut graph = RelationshipGraph::new();
        let tags = schema.relationship("post", "tags").unwrap().clone();

        graph
            .relate(links, "post", POST_A, &tags, TAG, Layer::Current)
            .unwrap();
        assert_eq!(graph.members(TAG, "posts", Layer::Current), vec![POST_A]);

        graph
            .unrelate(links, "post", POST_A, &tags, TAG, Layer::Current)
            .unwrap();
        assert!(graph.members(TAG, "posts", Layer::Current).is_empty());
    }

    #[test]
    fn sync_layer_reorders_and_diffs() {
        let schema = schema();
        let types = types();
        let links = LinkContext::new(&schema, &types);
        let mut graph = RelationshipGraph::new();
        let comments = schema.relationship("post", "comments").unwrap().clone();
        let c1 = ClientId(10);
        let c2 = ClientId(11);

        graph
            .sync_layer(
                links,
                "post",
                POST_A,
                &comments,
                &Members::Many(vec![c1, c2]),
                Layer::Canonical,
            )
            .unwrap();
        graph
            .sync_layer(
                links,
                "post",
                POST_A,
                &comments,
                &Members::Many(vec![c2, COMMENT]),
                Layer::Canonical,
            )
            .unwrap();

        assert_eq!(
            graph.members(POST_A, "comments", Layer::Canonical),
            vec![c2, COMMENT]
        );
        assert_eq!(graph.get_one(c1, "post", Layer::Canonical), None);
        assert_eq!(graph.get_one(COMMENT, "post", Layer::Canonical), Some(POST_A));
    }

    #[test]
    fn remove_record_clears_references() {
        let schema = schema();
        let types = types();
        let links = LinkContext::new(&schema, &types);
        let mut graph = RelationshipGraph::new();
        let comments = schema.relationship("post", "comments").unwrap().clone();

        for layer in [Layer::Current, Layer::Canonical] {
            graph
                .relate(links, "post", POST_A, &comments, COMMENT, layer)
                .unwrap();
        }
        graph.take_touched();
        graph.remove_record(COMMENT);

        assert!(graph.members(POST_A, "comments", Layer::Current).is_empty());
        assert!(graph.members(POST_A, "comments", Layer::Canonical).is_empty());
        assert!(graph.referrers(COMMENT).is_empty());
        assert!(graph.referrers(POST_A).is_empty());
        assert!(graph.take_touched().contains_key(&POST_A));
    }

    #[test]
    fn unlink_only_touches_one_layer() {
        let schema = schema();
        let types = types();
        let links = LinkContext::new(&schema, &types);
        let mut graph = RelationshipGraph::new();
        let post = schema.relationship("comment", "post").unwrap().clone();

        for layer in [Layer::Current, Layer::Canonical] {
            graph
                .relate(links, "comment", COMMENT, &post, POST_A, layer)
                .unwrap();
        }
        graph
            .unlink(links, "comment", COMMENT, Layer::Current)
            .unwrap();

        assert!(graph.members(POST_A, "comments", Layer::Current).is_empty());
        assert_eq!(
            graph.members(POST_A, "comments", Layer::Canonical),
            vec![COMMENT]
        );
        assert!(!graph.edge(COMMENT, "post").unwrap().is_clean());
    }

    #[test]
    fn polymorphic_belongs_to_moves_between_subtype_has_manys() {
        let schema = commentables();
        let types = types();
        let links = LinkContext::new(&schema, &types);
        let comments = schema.relationship("post", "comments").unwrap().clone();
        let remarks = schema.relationship("video", "remarks").unwrap().clone();
        let commentable = schema.relationship("comment", "commentable").unwrap().clone();

        let mut graph = RelationshipGraph::new();
        graph
            .relate(links, "post", POST_A, &comments, COMMENT, Layer::Current)
            .unwrap();
        assert_eq!(
            graph.get_one(COMMENT, "commentable", Layer::Current),
            Some(POST_A)
        );

        graph
            .relate(links, "comment", COMMENT, &commentable, POST_B, Layer::Current)
            .unwrap();
        assert!(graph.members(POST_A, "comments", Layer::Current).is_empty());
        assert_eq!(graph.members(POST_B, "comments", Layer::Current), vec![COMMENT]);

        // A video takes the comment from a post through its own relationship.
        graph
            .relate(links, "video", VIDEO, &remarks, COMMENT, Layer::Current)
            .unwrap();
        assert!(graph.members(POST_B, "comments", Layer::Current).is_empty());
        assert_eq!(
            graph.get_one(COMMENT, "commentable", Layer::Current),
            Some(VIDEO)
        );

        // And a post takes it back from the video.
        graph
            .relate(links, "post", POST_A, &comments, COMMENT, Layer::Current)
            .unwrap();
        assert!(graph.members(VIDEO, "remarks", Layer::Current).is_empty());
        assert_eq!(graph.members(POST_A, "comments", Layer::Current), vec![COMMENT]);
        assert_eq!(
            graph.referrers(COMMENT),
            vec![(POST_A, "comments".to_string())]
        );
    }
}
