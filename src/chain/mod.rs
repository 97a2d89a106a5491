//! Chains (pages) of handler units and how they are built.

mod core;
mod instantiate;
mod remnant;

pub use core::{
    page_fn, ChainDecorator, ChainElement, FnPage, HandlerChain, PageFactory, StaticPage, UnitSpec,
};
pub use instantiate::{Instantiator, UnitRegistry};
pub use remnant::ChainRemnant;
