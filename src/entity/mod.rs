pub mod cart_items;
pub mod categories;
pub mod order_items;
pub mod orders;
pub mod otps;
pub mod product_variants;
pub mod products;
pub mod users;
pub mod wishlists;

pub use cart_items::Entity as CartItems;
pub use categories::Entity as Categories;
pub use order_items::Entity as OrderItems;
pub use orders::Entity as Orders;
pub use otps::Entity as Otps;
pub use product_variants::Entity as ProductVariants;
pub use products::Entity as Products;
pub use users::Entity as Users;
pub use wishlists::Entity as Wishlists;
