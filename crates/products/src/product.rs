use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockflow_core::entity::{self, Entity};
use stockflow_core::{
    Aggregate, AggregateRoot, AlternativeId, DomainError, ProductId, Quantity,
    RequirementGroupId, StockItemId,
};
use stockflow_events::Event;

/// One stock item consumed `quantity` times per purchased unit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub item_id: StockItemId,
    pub quantity: Quantity,
}

/// One selectable option of a select-one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alternative {
    pub id: AlternativeId,
    pub name: String,
    pub requirements: Vec<Requirement>,
}

impl Entity for Alternative {
    type Id = AlternativeId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// What a requirement group demands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum GroupKind {
    /// Every listed item is always consumed.
    AllOf { requirements: Vec<Requirement> },
    /// The buyer picks one alternative. Optional groups never gate availability.
    SelectOne { required: bool, alternatives: Vec<Alternative> },
}

/// Requirement group (a fixed item list or a schema with options).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementGroup {
    pub id: RequirementGroupId,
    pub name: String,
    pub kind: GroupKind,
}

impl Entity for RequirementGroup {
    type Id = RequirementGroupId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Shape of a group at creation time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupSpec {
    AllOf,
    SelectOne { required: bool },
}

/// Where a requirement is attached: a fixed group or an alternative.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementTarget {
    Group(RequirementGroupId),
    Alternative(AlternativeId),
}

/// Aggregate root: Product (purchasable unit).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    name: String,
    groups: Vec<RequirementGroup>,
    deleted: bool,
    version: u64,
    created: bool,
}

impl Product {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            name: String::new(),
            groups: Vec::new(),
            deleted: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn groups(&self) -> &[RequirementGroup] {
        &self.groups
    }

    pub fn group(&self, group_id: &RequirementGroupId) -> Option<&RequirementGroup> {
        entity::find(&self.groups, group_id)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Created and not deleted.
    pub fn is_live(&self) -> bool {
        self.created && !self.deleted
    }

    /// Every stock item referenced anywhere in the product.
    pub fn item_ids(&self) -> BTreeSet<StockItemId> {
        let mut ids = BTreeSet::new();
        for group in &self.groups {
            match &group.kind {
                GroupKind::AllOf { requirements } => {
                    ids.extend(requirements.iter().map(|r| r.item_id));
                }
                GroupKind::SelectOne { alternatives, .. } => {
                    for alt in alternatives {
                        ids.extend(alt.requirements.iter().map(|r| r.item_id));
                    }
                }
            }
        }
        ids
    }

    /// Requirements at a target, if the target exists.
    pub fn requirements_at(&self, target: &RequirementTarget) -> Option<&[Requirement]> {
        match target {
            RequirementTarget::Group(group_id) => match &self.group(group_id)?.kind {
                GroupKind::AllOf { requirements } => Some(requirements),
                GroupKind::SelectOne { .. } => None,
            },
            RequirementTarget::Alternative(alt_id) => {
                self.alternative(alt_id).map(|(_, alt)| alt.requirements.as_slice())
            }
        }
    }

    /// An alternative and the id of the group that owns it.
    pub fn alternative(&self, alt_id: &AlternativeId) -> Option<(RequirementGroupId, &Alternative)> {
        self.groups.iter().find_map(|group| match &group.kind {
            GroupKind::SelectOne { alternatives, .. } => {
                entity::find(alternatives, alt_id).map(|alt| (group.id, alt))
            }
            GroupKind::AllOf { .. } => None,
        })
    }

    fn requirements_at_mut(&mut self, target: &RequirementTarget) -> Option<&mut Vec<Requirement>> {
        match target {
            RequirementTarget::Group(group_id) => {
                match &mut entity::find_mut(&mut self.groups, group_id)?.kind {
                    GroupKind::AllOf { requirements } => Some(requirements),
                    GroupKind::SelectOne { .. } => None,
                }
            }
            RequirementTarget::Alternative(alt_id) => {
                self.groups.iter_mut().find_map(|group| match &mut group.kind {
                    GroupKind::SelectOne { alternatives, .. } => {
                        entity::find_mut(alternatives, alt_id).map(|alt| &mut alt.requirements)
                    }
                    GroupKind::AllOf { .. } => None,
                })
            }
        }
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub product_id: ProductId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddGroup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddGroup {
    pub product_id: ProductId,
    pub group_id: RequirementGroupId,
    pub name: String,
    pub spec: GroupSpec,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddAlternative (to a select-one group).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddAlternative {
    pub product_id: ProductId,
    pub group_id: RequirementGroupId,
    pub alternative_id: AlternativeId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AttachRequirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachRequirement {
    pub product_id: ProductId,
    pub target: RequirementTarget,
    pub item_id: StockItemId,
    pub quantity: Quantity,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DetachRequirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetachRequirement {
    pub product_id: ProductId,
    pub target: RequirementTarget,
    pub item_id: StockItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetRequiredQuantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetRequiredQuantity {
    pub product_id: ProductId,
    pub target: RequirementTarget,
    pub item_id: StockItemId,
    pub quantity: Quantity,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveAlternative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveAlternative {
    pub product_id: ProductId,
    pub alternative_id: AlternativeId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveGroup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveGroup {
    pub product_id: ProductId,
    pub group_id: RequirementGroupId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteProduct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteProduct {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    CreateProduct(CreateProduct),
    AddGroup(AddGroup),
    AddAlternative(AddAlternative),
    AttachRequirement(AttachRequirement),
    DetachRequirement(DetachRequirement),
    SetRequiredQuantity(SetRequiredQuantity),
    RemoveAlternative(RemoveAlternative),
    RemoveGroup(RemoveGroup),
    DeleteProduct(DeleteProduct),
}

impl ProductCommand {
    pub fn product_id(&self) -> ProductId {
        match self {
            ProductCommand::CreateProduct(c) => c.product_id,
            ProductCommand::AddGroup(c) => c.product_id,
            ProductCommand::AddAlternative(c) => c.product_id,
            ProductCommand::AttachRequirement(c) => c.product_id,
            ProductCommand::DetachRequirement(c) => c.product_id,
            ProductCommand::SetRequiredQuantity(c) => c.product_id,
            ProductCommand::RemoveAlternative(c) => c.product_id,
            ProductCommand::RemoveGroup(c) => c.product_id,
            ProductCommand::DeleteProduct(c) => c.product_id,
        }
    }

    /// Stock item the command references, if any (checked for existence by the service).
    pub fn referenced_item(&self) -> Option<StockItemId> {
        match self {
            ProductCommand::AttachRequirement(c) => Some(c.item_id),
            _ => None,
        }
    }
}

/// Event: ProductCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub product_id: ProductId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: GroupAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAdded {
    pub product_id: ProductId,
    pub group_id: RequirementGroupId,
    pub name: String,
    pub spec: GroupSpec,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AlternativeAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternativeAdded {
    pub product_id: ProductId,
    pub group_id: RequirementGroupId,
    pub alternative_id: AlternativeId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RequirementAttached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementAttached {
    pub product_id: ProductId,
    pub target: RequirementTarget,
    pub item_id: StockItemId,
    pub quantity: Quantity,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RequirementDetached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementDetached {
    pub product_id: ProductId,
    pub target: RequirementTarget,
    pub item_id: StockItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RequiredQuantityChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredQuantityChanged {
    pub product_id: ProductId,
    pub target: RequirementTarget,
    pub item_id: StockItemId,
    pub quantity: Quantity,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AlternativeRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternativeRemoved {
    pub product_id: ProductId,
    pub alternative_id: AlternativeId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: GroupRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRemoved {
    pub product_id: ProductId,
    pub group_id: RequirementGroupId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ProductDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDeleted {
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductCreated(ProductCreated),
    GroupAdded(GroupAdded),
    AlternativeAdded(AlternativeAdded),
    RequirementAttached(RequirementAttached),
    RequirementDetached(RequirementDetached),
    RequiredQuantityChanged(RequiredQuantityChanged),
    AlternativeRemoved(AlternativeRemoved),
    GroupRemoved(GroupRemoved),
    ProductDeleted(ProductDeleted),
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "products.product.created",
            ProductEvent::GroupAdded(_) => "products.product.group_added",
            ProductEvent::AlternativeAdded(_) => "products.product.alternative_added",
            ProductEvent::RequirementAttached(_) => "products.product.requirement_attached",
            ProductEvent::RequirementDetached(_) => "products.product.requirement_detached",
            ProductEvent::RequiredQuantityChanged(_) => "products.product.required_quantity_changed",
            ProductEvent::AlternativeRemoved(_) => "products.product.alternative_removed",
            ProductEvent::GroupRemoved(_) => "products.product.group_removed",
            ProductEvent::ProductDeleted(_) => "products.product.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductCreated(e) => e.occurred_at,
            ProductEvent::GroupAdded(e) => e.occurred_at,
            ProductEvent::AlternativeAdded(e) => e.occurred_at,
            ProductEvent::RequirementAttached(e) => e.occurred_at,
            ProductEvent::RequirementDetached(e) => e.occurred_at,
            ProductEvent::RequiredQuantityChanged(e) => e.occurred_at,
            ProductEvent::AlternativeRemoved(e) => e.occurred_at,
            ProductEvent::GroupRemoved(e) => e.occurred_at,
            ProductEvent::ProductDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductCreated(e) => {
                self.id = e.product_id;
                self.name = e.name.clone();
                self.created = true;
            }
            ProductEvent::GroupAdded(e) => {
                let kind = match e.spec {
                    GroupSpec::AllOf => GroupKind::AllOf { requirements: Vec::new() },
                    GroupSpec::SelectOne { required } => GroupKind::SelectOne {
                        required,
                        alternatives: Vec::new(),
                    },
                };
                self.groups.push(RequirementGroup {
                    id: e.group_id,
                    name: e.name.clone(),
                    kind,
                });
            }
            ProductEvent::AlternativeAdded(e) => {
                if let Some(group) = entity::find_mut(&mut self.groups, &e.group_id) {
                    if let GroupKind::SelectOne { alternatives, .. } = &mut group.kind {
                        alternatives.push(Alternative {
                            id: e.alternative_id,
                            name: e.name.clone(),
                            requirements: Vec::new(),
                        });
                    }
                }
            }
            ProductEvent::RequirementAttached(e) => {
                if let Some(reqs) = self.requirements_at_mut(&e.target) {
                    reqs.push(Requirement {
                        item_id: e.item_id,
                        quantity: e.quantity,
                    });
                }
            }
            ProductEvent::RequirementDetached(e) => {
                if let Some(reqs) = self.requirements_at_mut(&e.target) {
                    reqs.retain(|r| r.item_id != e.item_id);
                }
            }
            ProductEvent::RequiredQuantityChanged(e) => {
                if let Some(reqs) = self.requirements_at_mut(&e.target) {
                    for r in reqs.iter_mut().filter(|r| r.item_id == e.item_id) {
                        r.quantity = e.quantity;
                    }
                }
            }
            ProductEvent::AlternativeRemoved(e) => {
                for group in &mut self.groups {
                    if let GroupKind::SelectOne { alternatives, .. } = &mut group.kind {
                        alternatives.retain(|alt| alt.id != e.alternative_id);
                    }
                }
            }
            ProductEvent::GroupRemoved(e) => {
                self.groups.retain(|g| g.id != e.group_id);
            }
            ProductEvent::ProductDeleted(_) => {
                self.deleted = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::CreateProduct(cmd) => self.handle_create(cmd),
            ProductCommand::AddGroup(cmd) => self.handle_add_group(cmd),
            ProductCommand::AddAlternative(cmd) => self.handle_add_alternative(cmd),
            ProductCommand::AttachRequirement(cmd) => self.handle_attach(cmd),
            ProductCommand::DetachRequirement(cmd) => self.handle_detach(cmd),
            ProductCommand::SetRequiredQuantity(cmd) => self.handle_set_quantity(cmd),
            ProductCommand::RemoveAlternative(cmd) => self.handle_remove_alternative(cmd),
            ProductCommand::RemoveGroup(cmd) => self.handle_remove_group(cmd),
            ProductCommand::DeleteProduct(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Product {
    fn ensure_live(&self, product_id: ProductId) -> Result<(), DomainError> {
        if !self.is_live() {
            return Err(DomainError::UnitNotFound(product_id));
        }
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn ensure_target(&self, target: &RequirementTarget) -> Result<&[Requirement], DomainError> {
        self.requirements_at(target).ok_or_else(|| {
            DomainError::validation(format!("unknown requirement target {target:?}"))
        })
    }

    fn handle_create(&self, cmd: &CreateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        Ok(vec![ProductEvent::ProductCreated(ProductCreated {
            product_id: cmd.product_id,
            name: cmd.name.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_group(&self, cmd: &AddGroup) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_live(cmd.product_id)?;
        if self.group(&cmd.group_id).is_some() {
            return Err(DomainError::conflict("requirement group already exists"));
        }
        Ok(vec![ProductEvent::GroupAdded(GroupAdded {
            product_id: cmd.product_id,
            group_id: cmd.group_id,
            name: cmd.name.clone(),
            spec: cmd.spec,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_alternative(&self, cmd: &AddAlternative) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_live(cmd.product_id)?;
        let Some(group) = self.group(&cmd.group_id) else {
            return Err(DomainError::validation(format!("unknown requirement group {}", cmd.group_id)));
        };
        if !matches!(group.kind, GroupKind::SelectOne { .. }) {
            return Err(DomainError::validation("alternatives belong to select-one groups"));
        }
        if self.alternative(&cmd.alternative_id).is_some() {
            return Err(DomainError::conflict("alternative already exists"));
        }
        Ok(vec![ProductEvent::AlternativeAdded(AlternativeAdded {
            product_id: cmd.product_id,
            group_id: cmd.group_id,
            alternative_id: cmd.alternative_id,
            name: cmd.name.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_attach(&self, cmd: &AttachRequirement) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_live(cmd.product_id)?;
        if !cmd.quantity.is_positive() {
            return Err(DomainError::validation("required quantity must be positive"));
        }
        let existing = self.ensure_target(&cmd.target)?;
        if existing.iter().any(|r| r.item_id == cmd.item_id) {
            return Err(DomainError::conflict("item already attached to this target"));
        }
        Ok(vec![ProductEvent::RequirementAttached(RequirementAttached {
            product_id: cmd.product_id,
            target: cmd.target,
            item_id: cmd.item_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_detach(&self, cmd: &DetachRequirement) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_live(cmd.product_id)?;
        let existing = self.ensure_target(&cmd.target)?;
        if !existing.iter().any(|r| r.item_id == cmd.item_id) {
            return Ok(vec![]);
        }
        Ok(vec![ProductEvent::RequirementDetached(RequirementDetached {
            product_id: cmd.product_id,
            target: cmd.target,
            item_id: cmd.item_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_quantity(&self, cmd: &SetRequiredQuantity) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_live(cmd.product_id)?;
        if !cmd.quantity.is_positive() {
            return Err(DomainError::validation("required quantity must be positive"));
        }
        let existing = self.ensure_target(&cmd.target)?;
        let Some(current) = existing.iter().find(|r| r.item_id == cmd.item_id) else {
            return Err(DomainError::validation(format!("item {} is not attached", cmd.item_id)));
        };
        if current.quantity == cmd.quantity {
            return Ok(vec![]);
        }
        Ok(vec![ProductEvent::RequiredQuantityChanged(RequiredQuantityChanged {
            product_id: cmd.product_id,
            target: cmd.target,
            item_id: cmd.item_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_alternative(
        &self,
        cmd: &RemoveAlternative,
    ) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_live(cmd.product_id)?;
        if self.alternative(&cmd.alternative_id).is_none() {
            return Ok(vec![]);
        }
        Ok(vec![ProductEvent::AlternativeRemoved(AlternativeRemoved {
            product_id: cmd.product_id,
            alternative_id: cmd.alternative_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_group(&self, cmd: &RemoveGroup) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_live(cmd.product_id)?;
        if self.group(&cmd.group_id).is_none() {
            return Ok(vec![]);
        }
        Ok(vec![ProductEvent::GroupRemoved(GroupRemoved {
            product_id: cmd.product_id,
            group_id: cmd.group_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteProduct) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_live(cmd.product_id)?;
        Ok(vec![ProductEvent::ProductDeleted(ProductDeleted {
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockflow_events::execute;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn created_product() -> Product {
        let id = ProductId::new();
        let mut product = Product::empty(id);
        execute(
            &mut product,
            &ProductCommand::CreateProduct(CreateProduct {
                product_id: id,
                name: "T-shirt".to_string(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        product
    }

    fn add_group(product: &mut Product, spec: GroupSpec) -> RequirementGroupId {
        let group_id = RequirementGroupId::new();
        execute(
            product,
            &ProductCommand::AddGroup(AddGroup {
                product_id: product.id_typed(),
                group_id,
                name: "Size".to_string(),
                spec,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        group_id
    }

    fn add_alternative(product: &mut Product, group_id: RequirementGroupId) -> AlternativeId {
        let alternative_id = AlternativeId::new();
        execute(
            product,
            &ProductCommand::AddAlternative(AddAlternative {
                product_id: product.id_typed(),
                group_id,
                alternative_id,
                name: "M".to_string(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        alternative_id
    }

    fn attach(product: &mut Product, target: RequirementTarget, item_id: StockItemId, qty: i64) {
        execute(
            product,
            &ProductCommand::AttachRequirement(AttachRequirement {
                product_id: product.id_typed(),
                target,
                item_id,
                quantity: Quantity::units(qty),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
    }

    #[test]
    fn create_product_rejects_empty_name() {
        let product = Product::empty(ProductId::new());
        let err = product
            .handle(&ProductCommand::CreateProduct(CreateProduct {
                product_id: product.id_typed(),
                name: "   ".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn commands_on_missing_product_are_unit_not_found() {
        let id = ProductId::new();
        let product = Product::empty(id);
        let err = product
            .handle(&ProductCommand::AddGroup(AddGroup {
                product_id: id,
                group_id: RequirementGroupId::new(),
                name: "Size".to_string(),
                spec: GroupSpec::AllOf,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::UnitNotFound(id));
    }

    #[test]
    fn attach_and_detach_track_item_ids() {
        let mut product = created_product();
        let fixed = add_group(&mut product, GroupSpec::AllOf);
        let select = add_group(&mut product, GroupSpec::SelectOne { required: true });
        let alt = add_alternative(&mut product, select);
        let a = StockItemId::new();
        let b = StockItemId::new();

        attach(&mut product, RequirementTarget::Group(fixed), a, 1);
        attach(&mut product, RequirementTarget::Alternative(alt), b, 2);
        assert_eq!(product.item_ids(), BTreeSet::from([a, b]));

        let product_id = product.id_typed();
        execute(
            &mut product,
            &ProductCommand::DetachRequirement(DetachRequirement {
                product_id,
                target: RequirementTarget::Alternative(alt),
                item_id: b,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(product.item_ids(), BTreeSet::from([a]));
    }

    #[test]
    fn attaching_twice_is_a_conflict() {
        let mut product = created_product();
        let fixed = add_group(&mut product, GroupSpec::AllOf);
        let item = StockItemId::new();
        attach(&mut product, RequirementTarget::Group(fixed), item, 1);

        let err = product
            .handle(&ProductCommand::AttachRequirement(AttachRequirement {
                product_id: product.id_typed(),
                target: RequirementTarget::Group(fixed),
                item_id: item,
                quantity: Quantity::units(3),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn alternatives_require_a_select_group() {
        let mut product = created_product();
        let fixed = add_group(&mut product, GroupSpec::AllOf);
        let err = product
            .handle(&ProductCommand::AddAlternative(AddAlternative {
                product_id: product.id_typed(),
                group_id: fixed,
                alternative_id: AlternativeId::new(),
                name: "L".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn set_required_quantity_updates_in_place() {
        let mut product = created_product();
        let select = add_group(&mut product, GroupSpec::SelectOne { required: true });
        let alt = add_alternative(&mut product, select);
        let item = StockItemId::new();
        attach(&mut product, RequirementTarget::Alternative(alt), item, 1);

        let product_id = product.id_typed();
        let events = execute(
            &mut product,
            &ProductCommand::SetRequiredQuantity(SetRequiredQuantity {
                product_id,
                target: RequirementTarget::Alternative(alt),
                item_id: item,
                quantity: "2.5".parse().unwrap(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(events.len(), 1);

        let reqs = product.requirements_at(&RequirementTarget::Alternative(alt)).unwrap();
        assert_eq!(reqs[0].quantity, "2.5".parse::<Quantity>().unwrap());
    }

    #[test]
    fn deleted_product_rejects_further_changes() {
        let mut product = created_product();
        let product_id = product.id_typed();
        execute(
            &mut product,
            &ProductCommand::DeleteProduct(DeleteProduct {
                product_id,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert!(product.is_deleted());

        let err = product
            .handle(&ProductCommand::RemoveGroup(RemoveGroup {
                product_id: product.id_typed(),
                group_id: RequirementGroupId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::UnitNotFound(product.id_typed()));
    }

    #[test]
    fn removing_a_group_drops_its_items() {
        let mut product = created_product();
        let select = add_group(&mut product, GroupSpec::SelectOne { required: false });
        let alt = add_alternative(&mut product, select);
        attach(&mut product, RequirementTarget::Alternative(alt), StockItemId::new(), 1);

        let product_id = product.id_typed();
        execute(
            &mut product,
            &ProductCommand::RemoveGroup(RemoveGroup {
                product_id,
                group_id: select,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        assert!(product.item_ids().is_empty());
        assert!(product.groups().is_empty());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 200,
                ..ProptestConfig::default()
            })]

            /// Property: handle never mutates state and is deterministic.
            #[test]
            fn handle_is_deterministic(qty in 1i64..1000) {
                let mut product = created_product();
                let fixed = add_group(&mut product, GroupSpec::AllOf);
                let before = product.clone();

                let cmd = ProductCommand::AttachRequirement(AttachRequirement {
                    product_id: product.id_typed(),
                    target: RequirementTarget::Group(fixed),
                    item_id: StockItemId::new(),
                    quantity: Quantity::units(qty),
                    occurred_at: test_time(),
                });

                let first = product.handle(&cmd);
                let second = product.handle(&cmd);

                prop_assert_eq!(&before, &product);
                prop_assert_eq!(first, second);
            }
        }
    }
}
