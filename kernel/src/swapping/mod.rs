//! Demand paging for user processes. Each paged process keeps at most
//! `quota` pages in memory; the rest live in its own swap file.

mod page_replacement;
mod pager;
mod resident_set;
mod swap_error;
mod swap_space;

pub use page_replacement::{
    age_resident_pages, LeastAccessedPage, NotFrequentlyUsed, PageReplacementPolicy,
    ReplacementPolicy, SecondChanceFifo,
};
pub use pager::Pager;
pub use resident_set::{Forgotten, PagingState, ResidentPage, SwappedPage};
pub use swap_error::{SwapError, SwapIoError};
pub use swap_space::{swap_file_name, BackingStore, InjectedFaults, MemoryBackingStore, SwapHandle};
