/// Commerce entities module
pub mod cart;
pub mod cart_item;
pub mod checkout_session;
pub mod product_image;

// Re-export entities
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use checkout_session::{
    CheckoutLineItem, CheckoutStatus, Entity as CheckoutSession, Model as CheckoutSessionModel,
};
pub use product_image::{Entity as ProductImage, Model as ProductImageModel};
