extern crate proc_macro;

use proc_macro::TokenStream;
use quote::quote;
use syn::{ItemFn, parse_macro_input};

/// Marks a test which spins up station threads. The test runs serially with all other tests
/// carrying this attribute and logs to stdout through a thread-local subscriber.
///
/// The optional argument names the crate under test, e.g. `#[integration_test(bike_sim)]` from
/// an integration test. It defaults to `crate`.
#[proc_macro_attribute]
pub fn integration_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input_fn = parse_macro_input!(item as ItemFn);
    let module_path: syn::Path = if attr.is_empty() {
        syn::parse_quote!(crate)
    } else {
        parse_macro_input!(attr as syn::Path)
    };
    let fn_name = &input_fn.sig.ident;
    let fn_body = &input_fn.block;
    let attrs = &input_fn.attrs;
    let fn_return_type = &input_fn.sig.output;

    let expanded = quote! {
        #(#attrs)*
        #[test]
        #[serial_test::serial]
        fn #fn_name() #fn_return_type {
            let _log_guard = #module_path::simulation::logging::init_std_out_logging_thread_local();
            #fn_body
        }
    };

    TokenStream::from(expanded)
}
