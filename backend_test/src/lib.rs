use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    parse::Parser, punctuated::Punctuated, spanned::Spanned, FnArg, Ident, ItemFn, Pat, Signature,
    Token, Type,
};

/// Transform an asynchronous test into a synchronous one and inject dependencies.
///
/// By default the test runs against a fresh `MemoryStore`. With `mongo`, it
/// runs against a `MongoStore` on a uniquely named database, which is dropped
/// regardless of how the test terminates; the test is skipped if
/// `BALLOT_TEST_DB_URI` is not set. With `admin`, the client is logged in as
/// an admin before the test starts.
///
/// Injectable dependencies are [`rocket::local::asynchronous::Client`] and,
/// with `mongo`, `crate::store::MongoStore`.
#[proc_macro_attribute]
pub fn backend_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = syn::parse_macro_input!(input as ItemFn);

    // Parse the options.
    let options = match Punctuated::<Ident, Token![,]>::parse_terminated.parse(args) {
        Ok(options) => options,
        Err(err) => return err.into_compile_error().into(),
    };
    let mut admin = false;
    let mut mongo = false;
    for option in options {
        if option == "admin" {
            admin = true;
        } else if option == "mongo" {
            mongo = true;
        } else {
            return syn::Error::new(option.span(), "Expected `admin` or `mongo`")
                .into_compile_error()
                .into();
        }
    }

    // Extract type information and reject invalid function signatures.
    let test_args = match check_sig(item_fn.sig.clone(), mongo) {
        Ok(args) => args,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    // Log in the client as admin if needed.
    let maybe_login = if admin {
        quote! {
            store
                .insert_admin(crate::model::db::Admin::example())
                .await
                .unwrap();

            // The response borrows the client, so must be gone before the client is returned.
            {
                let response = rocket_client
                    .post(uri!(crate::api::auth::authenticate))
                    .header(rocket::http::ContentType::JSON)
                    .body(rocket::serde::json::json!(crate::model::api::admin::AdminCredentials::example1()).to_string())
                    .dispatch()
                    .await;
                assert_eq!(response.status(), rocket::http::Status::Ok);
            }
        }
    } else {
        quote! {}
    };

    // Open the store.
    let (store_type, open_store, cleanup_store) = if mongo {
        (
            quote! { crate::store::MongoStore },
            quote! {
                let uri = match std::env::var("BALLOT_TEST_DB_URI") {
                    Ok(uri) => uri,
                    Err(_) => return None,
                };
                let db_name = format!("test{}", rand::random::<u32>());
                let store = crate::store::MongoStore::connect(&uri, &db_name)
                    .await
                    .unwrap();
                let shared: std::sync::Arc<dyn crate::store::BallotStore> =
                    std::sync::Arc::new(store.clone());
            },
            quote! {
                store.database().drop(None).await.unwrap();
            },
        )
    } else {
        (
            quote! { std::sync::Arc<crate::store::MemoryStore> },
            quote! {
                let store = std::sync::Arc::new(crate::store::MemoryStore::new());
                let shared: std::sync::Arc<dyn crate::store::BallotStore> = store.clone();
            },
            quote! {
                let _ = store;
            },
        )
    };

    // Rewrite the test function.
    quote! {
        #[test]
        fn #name() {
            #[allow(unused_imports)]
            use crate::store::BallotStore as _;

            /// Test setup.
            async fn setup() -> Option<(rocket::local::asynchronous::Client, #store_type)> {
                #open_store
                let rocket_client = rocket::local::asynchronous::Client::tracked(crate::rocket_for_store(shared))
                    .await
                    .unwrap();

                #maybe_login

                Some((rocket_client, store))
            }

            /// The test itself.
            #item_fn

            /// Test cleanup.
            async fn cleanup(store: #store_type) {
                #cleanup_store
            }

            log4rs_test_utils::test_logging::init_logging_once_for(["ballot_engine"], None, None);

            // Create an async runtime. We need a separate one for inside and
            // outside the `catch_unwind`.
            let outer_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("test-setup-cleanup")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();
            let inner_runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(1)
                .enable_all()
                .build()
                .unwrap();

            // Run the setup.
            let (rocket_client, store) = match outer_runtime.block_on(setup()) {
                Some(deps) => deps,
                None => {
                    eprintln!("Skipping {}: BALLOT_TEST_DB_URI is not set", stringify!(#name));
                    return;
                }
            };

            // Run the test, catching any panics.
            // Use mutexes to safely transfer `!UnwindSafe` data.
            let client_mutex = std::sync::Mutex::new(rocket_client);
            let store_mutex = std::sync::Mutex::new(store.clone());
            let runtime_mutex = std::sync::Mutex::new(inner_runtime);
            let result = std::panic::catch_unwind(|| {
                #[allow(unused_variables)]
                let rocket_client = client_mutex.into_inner().unwrap();
                #[allow(unused_variables)]
                let store = store_mutex.into_inner().unwrap();
                let runtime = runtime_mutex.into_inner().unwrap();

                runtime.block_on(#new_name(#(#test_args),*));
            });

            // Run the cleanup.
            outer_runtime.block_on(cleanup(store));

            // If the test panicked, re-raise the panic.
            if let Err(cause) = result {
                std::panic::resume_unwind(cause);
            }
        }
    }
    .into()
}

/// Ensure the wrapped test is async, extract parameters to inject, and reject unknown parameters.
fn check_sig(sig: Signature, mongo: bool) -> Result<Vec<TokenStream2>, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut has_client = false;
    let mut has_store = false;
    let mut args = vec![];

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let (Pat::Ident(_), Type::Path(type_path)) = (&*pat_type.pat, &*pat_type.ty) {
                if let Some(type_ident) = type_path.path.get_ident() {
                    if type_ident == "Client" {
                        if has_client {
                            return Err(syn::Error::new(
                                input.span(),
                                "Test cannot accept more than one `rocket::local::asynchronous::Client`",
                            ));
                        }
                        has_client = true;
                        args.push(quote! { rocket_client });
                        continue;
                    } else if type_ident == "MongoStore" && mongo {
                        if has_store {
                            return Err(syn::Error::new(
                                input.span(),
                                "Test cannot accept more than one `MongoStore`",
                            ));
                        }
                        has_store = true;
                        args.push(quote! { store });
                        continue;
                    }
                }
            }
        }

        return Err(syn::Error::new(
            input.span(),
            if mongo {
                "Expected one of `client_ident: Client` or `store_ident: MongoStore`"
            } else {
                "Expected `client_ident: Client`"
            },
        ));
    }

    Ok(args)
}
