pub mod cart;
pub mod cart_item;
pub mod feedback;
pub mod order;
pub mod product;
pub mod refund;
pub mod sold_product;
pub mod user;

pub use cart::Entity as Cart;
pub use cart_item::Entity as CartItem;
pub use feedback::Entity as Feedback;
pub use order::Entity as Order;
pub use product::Entity as Product;
pub use refund::Entity as Refund;
pub use sold_product::Entity as SoldProduct;
pub use user::Entity as User;

pub use cart::Model as CartModel;
pub use cart_item::Model as CartItemModel;
pub use order::Model as OrderModel;
pub use product::Model as ProductModel;
