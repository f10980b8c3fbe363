//! Persistent schema of the checkout workflow: the cart aggregate read during
//! validation and the order aggregate written by it.

pub mod address;
pub mod carrier;
pub mod cart;
pub mod cart_coupon;
pub mod cart_item;
pub mod cart_rule;
pub mod country;
pub mod currency;
pub mod customer;
pub mod order;
pub mod order_carrier;
pub mod order_cart_rule;
pub mod order_detail;
pub mod order_history;
pub mod order_note;
pub mod order_payment;
pub mod order_state;

pub use address::{Entity as Address, Model as AddressModel};
pub use carrier::{Entity as Carrier, Model as CarrierModel};
pub use cart::{CartStatus, Entity as Cart, Model as CartModel};
pub use cart_coupon::{Entity as CartCoupon, Model as CartCouponModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use cart_rule::{Entity as CartRule, Model as CartRuleModel};
pub use country::{Entity as Country, Model as CountryModel};
pub use currency::{Entity as Currency, Model as CurrencyModel};
pub use customer::{Entity as Customer, Model as CustomerModel};
pub use order::{Entity as Order, Model as OrderModel};
pub use order_carrier::{Entity as OrderCarrier, Model as OrderCarrierModel};
pub use order_cart_rule::{Entity as OrderCartRule, Model as OrderCartRuleModel};
pub use order_detail::{Entity as OrderDetail, Model as OrderDetailModel};
pub use order_history::{Entity as OrderHistory, Model as OrderHistoryModel};
pub use order_note::{Entity as OrderNote, Model as OrderNoteModel};
pub use order_payment::{Entity as OrderPayment, Model as OrderPaymentModel};
pub use order_state::{Entity as OrderState, Model as OrderStateModel};
