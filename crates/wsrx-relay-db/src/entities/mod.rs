//! Database entities

pub mod mapping;

pub use mapping::Entity as MappingEntity;

pub mod prelude {
    pub use super::mapping::Entity as Mapping;
}
