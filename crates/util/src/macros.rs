/// Widen an index or size to a usize.
#[macro_export]
macro_rules! cast_usize {
    ($e:expr) => {{
        let Ok(u) = <_ as TryInto<usize>>::try_into($e) else {
            unreachable!("unsupported target architecture")
        };
        u
    }};
}

#[macro_export]
macro_rules! saturate_u32 {
    ($e:expr) => {{ <_ as TryInto<u32>>::try_into($e).unwrap_or(u32::MAX) }};
}

pub use cast_usize;
pub use saturate_u32;
